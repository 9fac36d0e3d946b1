//! Maps a transport completion onto the caller-facing outcome.
//!
//! | completion                              | outcome                          |
//! |-----------------------------------------|----------------------------------|
//! | succeeded                               | `Success(body, 200)`             |
//! | cancelled                               | `Cancelled` (nothing delivered)  |
//! | failed, response attached               | `NetworkError(canned, status)`   |
//! | failed, no response                     | `NetworkError(canned, 408)`      |
//! | failed, unrecognized                    | `NetworkError(canned, 306)`      |

use crate::http::status;
use crate::transport::{Completion, TransportError};

/// Body handed to callers for every failed request.
pub const NETWORK_ERROR_JSON: &str = r#"{"success": false, "error": "Network error"}"#;

/// Value of the `error` key in `NETWORK_ERROR_JSON`.
pub const NETWORK_ERROR: &str = "Network error";

/// What a caller receives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { body: String, status: u16 },
    NetworkError { status: u16 },
    Cancelled,
}

impl Outcome {
    /// The `(body, status)` pair to deliver, or `None` when nothing is.
    pub fn into_delivery(self) -> Option<(String, u16)> {
        match self {
            Outcome::Success { body, status } => Some((body, status)),
            Outcome::NetworkError { status } => Some((NETWORK_ERROR_JSON.to_string(), status)),
            Outcome::Cancelled => None,
        }
    }
}

pub fn classify(completion: &Completion) -> Outcome {
    match completion {
        Completion::Succeeded(response) => Outcome::Success {
            body: response.body.clone(),
            status: status::OK,
        },
        Completion::Cancelled => Outcome::Cancelled,
        Completion::Failed(TransportError::WithResponse(response)) => Outcome::NetworkError {
            status: response.status,
        },
        Completion::Failed(TransportError::WithoutResponse { .. }) => Outcome::NetworkError {
            status: status::REQUEST_TIMEOUT,
        },
        Completion::Failed(TransportError::Unrecognized(_)) => Outcome::NetworkError {
            status: status::UNUSED,
        },
    }
}
