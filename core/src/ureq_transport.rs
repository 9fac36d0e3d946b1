//! Blocking HTTP transport built on `ureq`, one worker thread per call.
//!
//! # Design
//! A single `ureq::Agent` (and its connection pool) is shared by all calls.
//! Status codes are not treated as errors by the agent: a non-2xx answer is
//! turned into `TransportError::WithResponse` here so the broker sees the
//! real status. The session jar supplies the `Cookie` header and receives
//! every `Set-Cookie` from the response.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ureq::Agent;

use crate::config::BrokerConfig;
use crate::http::{ErrorResponse, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use crate::session::CookieJar;
use crate::transport::{Completer, Completion, RequestId, Transport, TransportCall, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Aborted,
    Running,
}

/// Calls between `dispatch` and the end of their worker.
///
/// An id only lives here while its worker has not finished, so aborting a
/// call that already completed leaves nothing behind.
#[derive(Debug, Default)]
struct CallTracker {
    calls: Mutex<HashMap<RequestId, CallState>>,
}

impl CallTracker {
    fn queue(&self, id: RequestId) {
        self.calls.lock().insert(id, CallState::Queued);
    }

    /// Mark the call as running. `false` if it was aborted before starting.
    fn begin(&self, id: RequestId) -> bool {
        let mut calls = self.calls.lock();
        if calls.get(&id) == Some(&CallState::Aborted) {
            calls.remove(&id);
            return false;
        }
        calls.insert(id, CallState::Running);
        true
    }

    fn finish(&self, id: RequestId) {
        self.calls.lock().remove(&id);
    }

    fn abort(&self, id: RequestId) {
        if let Some(state @ CallState::Queued) = self.calls.lock().get_mut(&id) {
            *state = CallState::Aborted;
        }
    }

    fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

pub struct UreqTransport {
    agent: Agent,
    user_agent: String,
    tracker: Arc<CallTracker>,
}

impl UreqTransport {
    pub fn new(config: &BrokerConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .max_idle_connections_per_host(config.max_connections)
            .build()
            .new_agent();
        Self {
            agent,
            user_agent: config.user_agent.clone(),
            tracker: Arc::default(),
        }
    }

    /// Calls dispatched whose worker has not finished yet.
    pub fn active_calls(&self) -> usize {
        self.tracker.len()
    }
}

impl Transport for UreqTransport {
    fn dispatch(&self, call: TransportCall, completer: Completer) {
        let agent = self.agent.clone();
        let user_agent = self.user_agent.clone();
        let tracker = Arc::clone(&self.tracker);
        let fallback = completer.clone();
        let id = call.id;
        self.tracker.queue(id);

        let worker_tracker = Arc::clone(&tracker);
        let spawned = std::thread::Builder::new()
            .name(format!("broker-{id}"))
            .spawn(move || {
                if !worker_tracker.begin(id) {
                    completer.complete(Completion::Cancelled);
                    return;
                }
                let completion = perform(&agent, &user_agent, call.request, &call.cookies);
                worker_tracker.finish(id);
                completer.complete(completion);
            });

        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn transport worker");
            tracker.finish(id);
            fallback.complete(Completion::Failed(TransportError::Unrecognized(err.to_string())));
        }
    }

    fn abort(&self, id: RequestId) {
        // Threads cannot be interrupted; a call that has not started yet is skipped.
        self.tracker.abort(id);
    }
}

fn perform(agent: &Agent, user_agent: &str, request: HttpRequest, cookies: &CookieJar) -> Completion {
    let parsed = url::Url::parse(&request.url).ok();
    let host = parsed.as_ref().and_then(|u| u.host_str().map(str::to_string));
    let path = parsed.as_ref().map_or("/", url::Url::path);

    let mut headers = request.headers;
    headers.push(("User-Agent".to_string(), user_agent.to_string()));
    if let Some(cookie) = host.as_deref().and_then(|h| cookies.header_for(h, path)) {
        headers.push(("Cookie".to_string(), cookie));
    }

    let result = match request.method {
        HttpMethod::Get => {
            let mut builder = agent.get(request.url.as_str());
            for (k, v) in &headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            builder.call()
        }
        HttpMethod::Post => {
            let mut builder = agent.post(request.url.as_str());
            for (k, v) in &headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            match &request.body {
                Some(body) => builder.send(body.as_bytes()),
                None => builder.send_empty(),
            }
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(err) => return Completion::Failed(classify_error(err)),
    };

    let status = response.status().as_u16();
    let response_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    if let Some(host) = &host {
        let set_cookies = response_headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str());
        cookies.store_set_cookies(host, set_cookies);
    }

    let body = response.body_mut().read_to_string();
    if (200..300).contains(&status) {
        return match body {
            Ok(body) => Completion::Succeeded(HttpResponse {
                status,
                headers: response_headers,
                body,
            }),
            Err(err) => Completion::Failed(TransportError::Unrecognized(err.to_string())),
        };
    }

    let body = match body {
        Ok(text) => ResponseBody::from_text(text),
        Err(ureq::Error::Io(err)) => ResponseBody::unreadable(err.kind()),
        Err(_) => ResponseBody::unreadable(io::ErrorKind::InvalidData),
    };
    Completion::Failed(TransportError::WithResponse(ErrorResponse {
        status,
        headers: response_headers,
        body,
    }))
}

fn classify_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::WithoutResponse {
            timed_out: true,
            detail: err.to_string(),
        },
        ureq::Error::Io(ref io_err) => TransportError::WithoutResponse {
            timed_out: io_err.kind() == io::ErrorKind::TimedOut,
            detail: err.to_string(),
        },
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => TransportError::WithoutResponse {
            timed_out: false,
            detail: err.to_string(),
        },
        other => TransportError::Unrecognized(other.to_string()),
    }
}
