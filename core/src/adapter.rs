//! Call-site adapters from raw `(body, status)` callbacks to decoded ones.
//!
//! The broker only ever hands back text. Callers that want structured data
//! wrap their handler here before issuing, e.g.
//!
//! ```ignore
//! broker.issue_get(&url, json_handler(|reply, status| match reply {
//!     Ok(doc) if is_success(&doc) => refresh(doc),
//!     _ => show_offline_banner(status),
//! }))?;
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DecodeError;

/// A decoded JSON object.
pub type JsonObject = serde_json::Map<String, Value>;

/// Decode the body as a JSON object before calling `handler`.
pub fn json_handler<F>(handler: F) -> impl FnOnce(String, u16) + Send + 'static
where
    F: FnOnce(Result<JsonObject, DecodeError>, u16) + Send + 'static,
{
    move |body: String, status: u16| handler(decode_object(&body), status)
}

/// Deserialize the body into `T` before calling `handler`.
pub fn typed_handler<T, F>(handler: F) -> impl FnOnce(String, u16) + Send + 'static
where
    T: DeserializeOwned,
    F: FnOnce(Result<T, DecodeError>, u16) + Send + 'static,
{
    move |body: String, status: u16| {
        let decoded = serde_json::from_str(&body).map_err(DecodeError::from);
        handler(decoded, status)
    }
}

pub fn decode_object(body: &str) -> Result<JsonObject, DecodeError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Whether a decoded reply carries `"success": true`.
pub fn is_success(doc: &JsonObject) -> bool {
    doc.get("success").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{NETWORK_ERROR, NETWORK_ERROR_JSON};
    use serde::Deserialize;
    use std::sync::mpsc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        success: bool,
        error: Option<String>,
    }

    #[test]
    fn canned_failure_decodes_as_object() {
        let (tx, rx) = mpsc::channel();
        let cb = json_handler(move |reply, status| tx.send((reply.unwrap(), status)).unwrap());
        cb(NETWORK_ERROR_JSON.to_string(), 503);
        let (doc, status) = rx.recv().unwrap();
        assert_eq!(status, 503);
        assert!(!is_success(&doc));
        assert_eq!(doc["error"], NETWORK_ERROR);
    }

    #[test]
    fn non_object_body_is_reported() {
        assert!(matches!(decode_object("[1, 2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_object("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn typed_handler_deserializes() {
        let (tx, rx) = mpsc::channel();
        let cb = typed_handler(move |reply: Result<Reply, DecodeError>, status| {
            tx.send((reply.unwrap(), status)).unwrap();
        });
        cb(r#"{"success": true}"#.to_string(), 200);
        assert_eq!(
            rx.recv().unwrap(),
            (
                Reply {
                    success: true,
                    error: None
                },
                200
            )
        );
    }
}
