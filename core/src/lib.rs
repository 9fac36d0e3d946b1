//! Client-side request broker for a JSON-over-HTTP game backend.
//!
//! # Overview
//! Callers issue GET and form-encoded POST requests with a completion
//! callback `(body, status)`. The broker hands each request to a
//! `Transport`, tracks it in a correlation table, and delivers exactly one
//! callback per completed request. Every failure reaches the caller in the
//! same shape: the canned body `{"success": false, "error": "Network error"}`
//! plus a status code.
//!
//! # Design
//! - `RequestBroker` owns the correlation table and the one-way
//!   short-circuit latch; cookies live in a shared `CookieJar`.
//! - `Transport` is the only component doing I/O. `UreqTransport` is the
//!   real one; tests plug in their own.
//! - `classify` is a pure mapping from completion to outcome.
//! - Real bodies of failed responses go to a `DiagnosticSink`, never to the
//!   caller.
//! - JSON decoding is left to the caller; `adapter` has thin wrappers.

pub mod adapter;
pub mod broker;
pub mod classify;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod logging;
pub mod session;
pub mod transport;
pub mod ureq_transport;

pub use broker::{Issued, RequestBroker, ResponseCallback};
pub use classify::{classify, Outcome, NETWORK_ERROR, NETWORK_ERROR_JSON};
pub use codec::{decode_form, encode_form, Payload};
pub use config::BrokerConfig;
pub use diagnostics::{DiagnosticSink, FailedResponse, FileSink, MemorySink, TracingSink};
pub use error::{BrokerError, ConfigError, DecodeError, EncodeError};
pub use http::{status, ErrorResponse, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
pub use session::{Cookie, CookieJar, NoValidation, SessionEtag, ValidationTokenProvider};
pub use transport::{Completer, Completion, RequestId, Transport, TransportCall, TransportError};
pub use ureq_transport::UreqTransport;
