//! Best-effort recording of failed response bodies.
//!
//! # Design
//! The real body of a failed response is never handed to the caller; it is
//! read here and passed to a `DiagnosticSink`. Nothing in this module can
//! fail the request: read errors are swallowed, sink panics are caught, and
//! the outcome is computed before the logger runs.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::http::ErrorResponse;
use crate::transport::RequestId;

/// A failed response as seen by the diagnostic logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResponse {
    pub request_id: RequestId,
    pub url: String,
    pub status: u16,
    /// `None` when the body could not be read.
    pub body: Option<String>,
}

/// Destination for failed-response records.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, failure: &FailedResponse);
}

/// Read `response` fully, release it, and hand the record to `sink`.
pub fn log_failed_response(sink: &dyn DiagnosticSink, request_id: RequestId, url: &str, response: ErrorResponse) {
    let body = match response.body.read_to_string() {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::debug!(%request_id, error = %err, "failed response body unreadable");
            None
        }
    };
    let failure = FailedResponse {
        request_id,
        url: url.to_string(),
        status: response.status,
        body,
    };
    if catch_unwind(AssertUnwindSafe(|| sink.record(&failure))).is_err() {
        tracing::debug!(%request_id, "diagnostic sink panicked");
    }
}

/// Emits each failure as a `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, failure: &FailedResponse) {
        tracing::warn!(
            request_id = %failure.request_id,
            url = %failure.url,
            status = failure.status,
            body = failure.body.as_deref().unwrap_or("<unreadable>"),
            "request failed"
        );
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<FailedResponse>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FailedResponse> {
        self.records.lock().clone()
    }

    pub fn take(&self) -> Vec<FailedResponse> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, failure: &FailedResponse) {
        self.records.lock().push(failure.clone());
    }
}

/// Writes each failure to its own numbered file under a directory.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    count: AtomicU64,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            count: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, failure: &FailedResponse) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("error-{n}.log"));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{} {}", failure.request_id, failure.url)?;
        writeln!(file, "status: {}", failure.status)?;
        writeln!(file)?;
        file.write_all(failure.body.as_deref().unwrap_or("<unreadable>").as_bytes())?;
        Ok(path)
    }
}

impl DiagnosticSink for FileSink {
    fn record(&self, failure: &FailedResponse) {
        match self.write(failure) {
            Ok(path) => tracing::debug!(path = %path.display(), "wrote failed response"),
            Err(err) => tracing::debug!(error = %err, "could not write failed response"),
        }
    }
}
