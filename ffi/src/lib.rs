//! C-ABI wrapper around `broker-core`.
//!
//! # Overview
//! Exposes the request broker through `extern "C"` functions so a host
//! written in any language with a C FFI can issue GET/POST requests and
//! receive `(body, status)` through a C callback, while Rust keeps the
//! correlation table, session cookies and failure normalization.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Issue functions return an `FfiErrorCode`; only programming errors
//!   (null or invalid arguments, unencodable payloads) are reported this
//!   way. Network failures always arrive through the callback.
//! - Callbacks run on transport threads, except in short-circuit mode where
//!   they run before the issue function returns.
//! - Strings returned to C must be released with `broker_free_string`.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use broker_core::{BrokerConfig, Issued, Payload, RequestBroker, RequestId, SessionEtag};

use types::*;

/// Borrow a C string as `&str`; `None` for null or invalid UTF-8.
fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn write_id(out_id: *mut u64, issued: Issued) {
    if !out_id.is_null() {
        let raw = issued.id().map_or(0, RequestId::as_u64);
        unsafe { *out_id = raw };
    }
}

// ---------------------------------------------------------------------------
// Broker lifecycle
// ---------------------------------------------------------------------------

/// Create a broker from a JSON configuration document.
///
/// Returns null if `config_json` is null, not valid UTF-8, not a valid
/// configuration, or if an internal panic occurs. The caller must free the
/// returned pointer with `broker_free`.
#[unsafe(no_mangle)]
pub extern "C" fn broker_new(config_json: *const c_char) -> *mut FfiBroker {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(text) = c_str(config_json) else {
            return std::ptr::null_mut();
        };
        let config = match BrokerConfig::from_json_str(text) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting broker configuration");
                return std::ptr::null_mut();
            }
        };
        let etag = Arc::new(SessionEtag::new());
        let inner = RequestBroker::from_config(&config, etag.clone());
        Box::into_raw(Box::new(FfiBroker { inner, etag }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a broker created by `broker_new`. Safe to call with null.
///
/// Requests still in flight are cancelled and their callbacks never fire.
/// A callback already running on a transport thread is waited for, so once
/// this returns the caller may release every `user_data` it handed out.
/// When called from inside a callback, that callback itself is not waited
/// for.
#[unsafe(no_mangle)]
pub extern "C" fn broker_free(broker: *mut FfiBroker) {
    if !broker.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(broker) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Issuing requests
// ---------------------------------------------------------------------------

/// Issue a GET request.
///
/// On `Ok`, `callback` fires exactly once (unless the request is cancelled)
/// and `*out_id` (if non-null) receives the request id, or 0 when the
/// request was short-circuited.
#[unsafe(no_mangle)]
pub extern "C" fn broker_issue_get(
    broker: *const FfiBroker,
    url: *const c_char,
    callback: Option<FfiResponseCallback>,
    user_data: *mut c_void,
    out_id: *mut u64,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(callback) = callback else {
            return FfiErrorCode::NullArg;
        };
        if broker.is_null() || url.is_null() {
            return FfiErrorCode::NullArg;
        }
        let broker = unsafe { &*broker };
        let Some(url) = c_str(url) else {
            return FfiErrorCode::InvalidUtf8;
        };
        let target = CallbackTarget::new(callback, user_data);
        match broker
            .inner
            .issue_get(url, move |body, status| target.deliver(body, status))
        {
            Ok(issued) => {
                write_id(out_id, issued);
                FfiErrorCode::Ok
            }
            Err(err) => FfiErrorCode::from(&err),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Issue a form-encoded POST request.
///
/// `payload_json` must be a JSON object whose values are strings, numbers
/// or booleans. An unencodable payload returns `Encoding` and nothing is
/// sent; the callback does not fire.
#[unsafe(no_mangle)]
pub extern "C" fn broker_issue_post(
    broker: *const FfiBroker,
    url: *const c_char,
    payload_json: *const c_char,
    bypass_validation: bool,
    callback: Option<FfiResponseCallback>,
    user_data: *mut c_void,
    out_id: *mut u64,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(callback) = callback else {
            return FfiErrorCode::NullArg;
        };
        if broker.is_null() || url.is_null() || payload_json.is_null() {
            return FfiErrorCode::NullArg;
        }
        let broker = unsafe { &*broker };
        let (Some(url), Some(payload_text)) = (c_str(url), c_str(payload_json)) else {
            return FfiErrorCode::InvalidUtf8;
        };
        let payload: Payload = match serde_json::from_str(payload_text) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "payload is not a JSON object");
                return FfiErrorCode::InvalidPayload;
            }
        };
        let target = CallbackTarget::new(callback, user_data);
        match broker.inner.issue_post(
            url,
            &payload,
            move |body, status| target.deliver(body, status),
            bypass_validation,
        ) {
            Ok(issued) => {
                write_id(out_id, issued);
                FfiErrorCode::Ok
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejecting post");
                FfiErrorCode::from(&err)
            }
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Cancel an in-flight request. Its callback will never fire.
///
/// Returns false when `id` is unknown, already completed or cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn broker_cancel(broker: *const FfiBroker, id: u64) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if broker.is_null() || id == 0 {
            return false;
        }
        let broker = unsafe { &*broker };
        broker.inner.cancel(RequestId::from_raw(id))
    }))
    .unwrap_or(false)
}

/// Number of requests awaiting completion.
#[unsafe(no_mangle)]
pub extern "C" fn broker_in_flight(broker: *const FfiBroker) -> u64 {
    catch_unwind(AssertUnwindSafe(|| {
        if broker.is_null() {
            return 0;
        }
        let broker = unsafe { &*broker };
        broker.inner.in_flight() as u64
    }))
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Session and mode
// ---------------------------------------------------------------------------

/// Answer every later request with the canned 503. Irreversible.
#[unsafe(no_mangle)]
pub extern "C" fn broker_set_short_circuit(broker: *const FfiBroker) {
    if broker.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let broker = unsafe { &*broker };
        broker.inner.set_short_circuit();
    }));
}

#[unsafe(no_mangle)]
pub extern "C" fn broker_is_short_circuited(broker: *const FfiBroker) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        !broker.is_null() && unsafe { &*broker }.inner.is_short_circuited()
    }))
    .unwrap_or(false)
}

/// Set the token sent as `If-Match` on POSTs. Null clears it.
#[unsafe(no_mangle)]
pub extern "C" fn broker_set_validation_token(broker: *const FfiBroker, token: *const c_char) {
    if broker.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let broker = unsafe { &*broker };
        match c_str(token) {
            Some(token) => broker.etag.set(token),
            None => broker.etag.clear(),
        }
    }));
}

/// Value of the session cookie `name` for `domain`, or null when absent.
///
/// The caller must free the returned string with `broker_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn broker_get_cookie(
    broker: *const FfiBroker,
    domain: *const c_char,
    name: *const c_char,
) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if broker.is_null() {
            return std::ptr::null_mut();
        }
        let broker = unsafe { &*broker };
        let (Some(domain), Some(name)) = (c_str(domain), c_str(name)) else {
            return std::ptr::null_mut();
        };
        broker
            .inner
            .session_cookie(domain, name)
            .and_then(|cookie| CString::new(cookie.value).ok())
            .map_or(std::ptr::null_mut(), CString::into_raw)
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Install the `tracing` subscriber at `level` (e.g. "info", "debug").
///
/// Returns false if `level` is invalid or logging is already initialized.
#[unsafe(no_mangle)]
pub extern "C" fn broker_init_logging(level: *const c_char) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        let level = c_str(level).unwrap_or("info");
        broker_core::logging::init_logging(level).is_ok()
    }))
    .unwrap_or(false)
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn broker_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { CString::from_raw(s) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
