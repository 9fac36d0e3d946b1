//! HTTP request/response types exchanged with the transport.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The broker
//! builds an `HttpRequest`, hands it to a `Transport`, and receives either an
//! `HttpResponse` (success) or an `ErrorResponse` (failure with an attached
//! response) back through a `Completion`. Only the transport touches the
//! network.
//!
//! All fields use owned types (`String`, `Vec`) so values can cross threads
//! and the FFI boundary without lifetime concerns.

use std::fmt;
use std::io::{self, Cursor, Read};

/// Status codes the broker itself produces.
pub mod status {
    pub const OK: u16 = 200;
    /// Reported when a failure carries no recognizable transport detail.
    pub const UNUSED: u16 = 306;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
///
/// Built by `RequestBroker::issue_*`. The transport executes it and reports
/// the result through its `Completer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A successful HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// The response attached to a failed request.
///
/// The body is a one-shot resource: it is read at most once, by the
/// diagnostic logger, and released afterwards. Callers never see it.
#[derive(Debug)]
pub struct ErrorResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ErrorResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::from_text(body),
        }
    }
}

/// A readable response body that may fail to read.
pub struct ResponseBody {
    reader: Box<dyn Read + Send>,
}

impl ResponseBody {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_reader(Cursor::new(text.into().into_bytes()))
    }

    /// A body whose stream is already gone; every read fails with `kind`.
    pub fn unreadable(kind: io::ErrorKind) -> Self {
        Self::from_reader(Unreadable(kind))
    }

    /// Read the whole body as UTF-8 text, consuming and releasing it.
    pub fn read_to_string(mut self) -> io::Result<String> {
        let mut text = String::new();
        self.reader.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody { .. }")
    }
}

struct Unreadable(io::ErrorKind);

impl Read for Unreadable {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(self.0, "response stream is closed"))
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest {
            method: HttpMethod::Post,
            url: "http://localhost/save".to_string(),
            headers: vec![("If-Match".to_string(), "\"v1\"".to_string())],
            body: None,
        };
        assert_eq!(req.header("if-match"), Some("\"v1\""));
        assert_eq!(req.header("cookie"), None);
    }

    #[test]
    fn response_body_reads_text() {
        let body = ResponseBody::from_text("internal error");
        assert_eq!(body.read_to_string().unwrap(), "internal error");
    }

    #[test]
    fn unreadable_body_reports_error() {
        let body = ResponseBody::unreadable(io::ErrorKind::BrokenPipe);
        let err = body.read_to_string().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn method_names() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
    }
}
