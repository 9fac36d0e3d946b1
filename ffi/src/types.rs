//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The broker delivers responses through a C function pointer plus an opaque
//! `user_data` pointer. Both are moved into the Rust callback and invoked on
//! whichever transport thread completes the request, so the C side must make
//! its callback thread-safe. Error codes are a flat C enum; details go to the
//! `tracing` log rather than across the boundary.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use broker_core::{BrokerError, RequestBroker, SessionEtag};

/// Opaque handle to a `RequestBroker`. C callers receive a pointer to this
/// and pass it back into every FFI function.
pub struct FfiBroker {
    pub(crate) inner: RequestBroker,
    pub(crate) etag: Arc<SessionEtag>,
}

impl Drop for FfiBroker {
    fn drop(&mut self) {
        // No callback may reach C once the handle is freed.
        let cancelled = self.inner.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "broker freed with requests in flight");
        }
    }
}

/// Completion callback: `body` is only valid for the duration of the call.
pub type FfiResponseCallback = extern "C" fn(user_data: *mut c_void, body: *const c_char, status: u16);

/// Result codes returned by the issue functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidUtf8 = 2,
    EmptyUrl = 3,
    InvalidPayload = 4,
    Encoding = 5,
    Panic = 6,
}

impl From<&BrokerError> for FfiErrorCode {
    fn from(err: &BrokerError) -> Self {
        match err {
            BrokerError::EmptyUrl => FfiErrorCode::EmptyUrl,
            BrokerError::Encode(_) => FfiErrorCode::Encoding,
        }
    }
}

/// A C callback and its user data, carried to the completing thread.
pub(crate) struct CallbackTarget {
    callback: FfiResponseCallback,
    user_data: *mut c_void,
}

// The C caller promises `user_data` may be used from any thread.
unsafe impl Send for CallbackTarget {}

impl CallbackTarget {
    pub(crate) fn new(callback: FfiResponseCallback, user_data: *mut c_void) -> Self {
        Self { callback, user_data }
    }

    pub(crate) fn deliver(self, body: String, status: u16) {
        let body = c_body(body);
        (self.callback)(self.user_data, body.as_ptr(), status);
    }
}

/// Convert a response body to a C string. Interior NUL bytes cannot cross
/// the boundary and are removed.
pub(crate) fn c_body(body: String) -> CString {
    match CString::new(body) {
        Ok(body) => body,
        Err(err) => {
            let bytes = err.into_vec();
            let stripped: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
            tracing::warn!(
                removed = bytes.len() - stripped.len(),
                "response body contains NUL bytes; removing them before delivery"
            );
            CString::new(stripped).unwrap_or_default()
        }
    }
}
