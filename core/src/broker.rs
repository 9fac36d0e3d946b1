//! The request broker: correlation table, short-circuit latch and delivery.
//!
//! # Design
//! Every issued request gets a fresh `RequestId` and one entry in the
//! correlation table holding its callback. Completions arrive from transport
//! threads; removing the entry is the single atomic step that grants the
//! right to deliver, so a callback fires at most once no matter how many
//! completions race for the same id. Cancelled requests lose their entry
//! without delivery.
//!
//! `cancel_all` empties the table and then waits for callbacks that are
//! already running, so once it returns no callback of this broker fires
//! again. A callback that calls `cancel_all` itself does not wait for its
//! own delivery.
//!
//! Once `set_short_circuit` is called, new requests never reach the
//! transport: the callback receives the canned network error with 503 on
//! the issuing thread and no entry is created.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::classify::{classify, NETWORK_ERROR_JSON};
use crate::codec::{encode_form, Payload};
use crate::config::BrokerConfig;
use crate::diagnostics::{log_failed_response, DiagnosticSink, FileSink, TracingSink};
use crate::error::BrokerError;
use crate::http::{status, HttpMethod, HttpRequest};
use crate::session::{Cookie, CookieJar, ValidationTokenProvider};
use crate::transport::{Completer, Completion, RequestId, Transport, TransportCall, TransportError};
use crate::ureq_transport::UreqTransport;

/// Caller-supplied completion callback: `(body, status)`, invoked at most once.
pub type ResponseCallback = Box<dyn FnOnce(String, u16) + Send + 'static>;

/// What `issue_*` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issued {
    /// Handed to the transport; the callback fires when it completes.
    InFlight(RequestId),
    /// Short-circuit mode: the callback has already received the canned 503.
    ShortCircuited,
}

impl Issued {
    pub fn id(self) -> Option<RequestId> {
        match self {
            Issued::InFlight(id) => Some(id),
            Issued::ShortCircuited => None,
        }
    }
}

struct Pending {
    url: String,
    callback: ResponseCallback,
}

/// Correlation entries plus the number of callbacks currently running.
#[derive(Default)]
struct Table {
    entries: HashMap<RequestId, Pending>,
    delivering: usize,
}

thread_local! {
    /// The broker whose callback is running on this thread, if any.
    static DELIVERING: Cell<*const Shared> = const { Cell::new(std::ptr::null()) };
}

/// Counts one running delivery until dropped.
struct Delivery<'a> {
    shared: &'a Shared,
    outer: *const Shared,
}

impl<'a> Delivery<'a> {
    /// Must be created while holding the table lock that removed the entry.
    fn start(shared: &'a Shared, table: &mut Table) -> Self {
        table.delivering += 1;
        let outer = DELIVERING.with(|current| current.replace(shared as *const Shared));
        Self { shared, outer }
    }
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.outer));
        let mut table = self.shared.table.lock();
        table.delivering -= 1;
        self.shared.idle.notify_all();
    }
}

pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    cookies: Arc<CookieJar>,
    validation: Arc<dyn ValidationTokenProvider>,
    sink: Arc<dyn DiagnosticSink>,
    table: Mutex<Table>,
    idle: Condvar,
    short_circuit: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn complete(&self, id: RequestId, completion: Completion) {
        let (pending, _delivery) = {
            let mut table = self.table.lock();
            let Some(pending) = table.entries.remove(&id) else {
                tracing::debug!(request_id = %id, "ignoring completion for unknown request");
                return;
            };
            let delivery = Delivery::start(self, &mut table);
            (pending, delivery)
        };

        let outcome = classify(&completion);
        match completion {
            Completion::Failed(TransportError::WithResponse(response)) => {
                log_failed_response(self.sink.as_ref(), id, &pending.url, response);
            }
            Completion::Failed(TransportError::WithoutResponse { timed_out, detail }) => {
                tracing::warn!(request_id = %id, url = %pending.url, timed_out, %detail, "request failed without a response");
            }
            Completion::Failed(TransportError::Unrecognized(detail)) => {
                tracing::warn!(request_id = %id, url = %pending.url, %detail, "request failed for an unrecognized reason");
            }
            Completion::Succeeded(_) | Completion::Cancelled => {}
        }

        match outcome.into_delivery() {
            Some((body, status)) => {
                tracing::debug!(request_id = %id, status, "delivering response");
                (pending.callback)(body, status);
            }
            None => tracing::debug!(request_id = %id, "request cancelled"),
        }
    }
}

/// Issues requests through a `Transport` and delivers exactly one callback
/// per completed request.
///
/// Cloning is cheap; clones share the correlation table, session and
/// short-circuit latch.
#[derive(Clone)]
pub struct RequestBroker {
    shared: Arc<Shared>,
}

impl RequestBroker {
    pub fn new(
        transport: Arc<dyn Transport>,
        cookies: Arc<CookieJar>,
        validation: Arc<dyn ValidationTokenProvider>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                cookies,
                validation,
                sink,
                table: Mutex::new(Table::default()),
                idle: Condvar::new(),
                short_circuit: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// A broker speaking real HTTP through `UreqTransport`.
    ///
    /// Failed responses go to a `FileSink` when `error_log_dir` is set and to
    /// `tracing` otherwise.
    pub fn from_config(config: &BrokerConfig, validation: Arc<dyn ValidationTokenProvider>) -> Self {
        let sink: Arc<dyn DiagnosticSink> = match &config.error_log_dir {
            Some(dir) => Arc::new(FileSink::new(dir)),
            None => Arc::new(TracingSink),
        };
        Self::new(
            Arc::new(UreqTransport::new(config)),
            Arc::new(CookieJar::new()),
            validation,
            sink,
        )
    }

    pub fn issue_get(
        &self,
        url: &str,
        callback: impl FnOnce(String, u16) + Send + 'static,
    ) -> Result<Issued, BrokerError> {
        if url.is_empty() {
            return Err(BrokerError::EmptyUrl);
        }
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        };
        Ok(self.issue(request, Box::new(callback)))
    }

    /// POST `payload` as a form body.
    ///
    /// The current validation token is sent as `If-Match` unless
    /// `bypass_validation` is set. A payload that cannot be encoded is
    /// rejected here, before anything is sent or registered.
    pub fn issue_post(
        &self,
        url: &str,
        payload: &Payload,
        callback: impl FnOnce(String, u16) + Send + 'static,
        bypass_validation: bool,
    ) -> Result<Issued, BrokerError> {
        if url.is_empty() {
            return Err(BrokerError::EmptyUrl);
        }
        let body = encode_form(payload)?;
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        if !bypass_validation {
            if let Some(token) = self.shared.validation.read_current_validation_token() {
                headers.push(("If-Match".to_string(), token));
            }
        }
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers,
            body: Some(body),
        };
        Ok(self.issue(request, Box::new(callback)))
    }

    fn issue(&self, request: HttpRequest, callback: ResponseCallback) -> Issued {
        if self.is_short_circuited() {
            tracing::info!(method = %request.method, url = %request.url, "short-circuiting request");
            callback(NETWORK_ERROR_JSON.to_string(), status::SERVICE_UNAVAILABLE);
            return Issued::ShortCircuited;
        }

        let id = RequestId(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(request_id = %id, method = %request.method, url = %request.url, "issuing request");
        self.shared.table.lock().entries.insert(
            id,
            Pending {
                url: request.url.clone(),
                callback,
            },
        );

        let call = TransportCall {
            id,
            request,
            cookies: Arc::clone(&self.shared.cookies),
        };
        let completer = Completer::new(id, Arc::downgrade(&self.shared));
        self.shared.transport.dispatch(call, completer);
        Issued::InFlight(id)
    }

    /// Forget an in-flight request; its callback will never fire.
    ///
    /// Returns `false` when the request already completed or was cancelled.
    pub fn cancel(&self, id: RequestId) -> bool {
        let removed = self.shared.table.lock().entries.remove(&id);
        if removed.is_none() {
            return false;
        }
        tracing::debug!(request_id = %id, "cancelling request");
        self.shared.transport.abort(id);
        true
    }

    /// Cancel every in-flight request and wait for callbacks already running
    /// on other threads. Returns how many requests were cancelled.
    ///
    /// After this returns no callback issued so far will fire. Requests
    /// issued afterwards are unaffected.
    pub fn cancel_all(&self) -> usize {
        let own = usize::from(DELIVERING.with(Cell::get) == Arc::as_ptr(&self.shared));
        let drained: Vec<(RequestId, Pending)> = {
            let mut table = self.shared.table.lock();
            let drained = table.entries.drain().collect();
            while table.delivering > own {
                self.shared.idle.wait(&mut table);
            }
            drained
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cancelling all requests");
        }
        for (id, _) in &drained {
            self.shared.transport.abort(*id);
        }
        drained.len()
    }

    /// Route every later request to the canned 503. Irreversible.
    pub fn set_short_circuit(&self) {
        if !self.shared.short_circuit.swap(true, Ordering::AcqRel) {
            tracing::info!("short-circuit enabled; requests will no longer reach the network");
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        self.shared.short_circuit.load(Ordering::Acquire)
    }

    pub fn session_cookie(&self, domain: &str, name: &str) -> Option<Cookie> {
        self.shared.cookies.get(domain, name)
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.shared.cookies
    }

    /// Number of requests awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.shared.table.lock().entries.len()
    }
}

impl fmt::Debug for RequestBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBroker")
            .field("in_flight", &self.in_flight())
            .field("short_circuit", &self.is_short_circuited())
            .finish()
    }
}
