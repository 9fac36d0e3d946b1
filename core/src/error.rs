//! Error types for the request broker.
//!
//! # Design
//! Only programming errors by the issuer escape synchronously: an empty URL
//! or a payload value that cannot be form-encoded. Everything that happens
//! on the wire is normalized into the canned network-error callback and
//! never surfaces as a Rust error.

use thiserror::Error;

/// A payload could not be converted into a form body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The value under `key` has no text form (null, array or object).
    #[error("payload value for `{key}` cannot be stringified ({kind})")]
    Unstringifiable { key: String, kind: &'static str },
}

/// Errors returned synchronously by `RequestBroker::issue_*`.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The request URL was empty.
    #[error("request url is empty")]
    EmptyUrl,

    /// The POST payload could not be encoded; nothing was sent.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Errors loading a `BrokerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config has no `{0}`")]
    Missing(&'static str),
}

/// A response body could not be decoded by a callback adapter.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_error_names_the_key() {
        let err = EncodeError::Unstringifiable {
            key: "tags".to_string(),
            kind: "array",
        };
        assert_eq!(
            err.to_string(),
            "payload value for `tags` cannot be stringified (array)"
        );
    }

    #[test]
    fn broker_error_wraps_encode_error_transparently() {
        let err: BrokerError = EncodeError::Unstringifiable {
            key: "x".to_string(),
            kind: "null",
        }
        .into();
        assert!(matches!(err, BrokerError::Encode(_)));
        assert!(err.to_string().starts_with("payload value for `x`"));
    }
}
