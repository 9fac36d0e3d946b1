//! The transport contract: the only seam that touches the network.
//!
//! # Design
//! The broker hands each request to a `Transport` together with a
//! `Completer`. The transport performs the I/O on its own execution context
//! and reports exactly one `Completion` through the completer. The completer
//! is a plain value (request id plus a weak reference to the broker), so a
//! transport may clone it, move it across threads, or even call it twice;
//! the broker only honours the first delivery for a live request.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::broker::Shared;
use crate::http::{ErrorResponse, HttpRequest, HttpResponse};
use crate::session::CookieJar;

/// Opaque per-request handle, unique for the lifetime of a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    /// Rebuild an id previously obtained from `as_u64`.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// How a dispatched request ended.
#[derive(Debug)]
pub enum Completion {
    Succeeded(HttpResponse),
    Failed(TransportError),
    /// The operation was aborted rather than failed.
    Cancelled,
}

/// Structured failure detail reported by a transport.
#[derive(Debug)]
pub enum TransportError {
    /// The backend answered, but with a failing status.
    WithResponse(ErrorResponse),
    /// No response was obtained: DNS, connection or timeout failure.
    WithoutResponse { timed_out: bool, detail: String },
    /// A failure the transport could not attribute to the exchange.
    Unrecognized(String),
}

/// A request handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub id: RequestId,
    pub request: HttpRequest,
    /// Session cookies; responses write their `Set-Cookie` values back here.
    pub cookies: Arc<CookieJar>,
}

/// Reports a request's completion back to the broker that issued it.
#[derive(Clone)]
pub struct Completer {
    id: RequestId,
    target: Weak<Shared>,
}

impl Completer {
    pub(crate) fn new(id: RequestId, target: Weak<Shared>) -> Self {
        Self { id, target }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Deliver the completion. Deliveries for requests that already
    /// completed, were cancelled, or whose broker is gone are ignored.
    pub fn complete(&self, completion: Completion) {
        match self.target.upgrade() {
            Some(shared) => shared.complete(self.id, completion),
            None => tracing::debug!(request_id = %self.id, "broker dropped before completion"),
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").field("id", &self.id).finish()
    }
}

/// Performs HTTP calls asynchronously on behalf of the broker.
///
/// `dispatch` must not block the caller and must eventually call
/// `completer.complete` exactly once, from any thread.
pub trait Transport: Send + Sync {
    fn dispatch(&self, call: TransportCall, completer: Completer);

    /// Best-effort abort of an in-flight call. The broker has already
    /// forgotten the request, so any later completion is dropped.
    fn abort(&self, _id: RequestId) {}
}
