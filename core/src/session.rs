//! Session-scoped state shared by every request.
//!
//! # Design
//! `CookieJar` is the only mutable state that transports write into. It is
//! internally synchronized, and all cookies carried by one response are
//! applied under a single lock acquisition, so concurrent responses never
//! interleave partial updates. Ordering between different responses is not
//! defined: the last one applied wins.
//!
//! The validation token (ETag) is read through `ValidationTokenProvider` so
//! the broker never reaches for global session state.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};

/// A single cookie as stored in the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// `None` for a session cookie that lives as long as the jar.
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(domain: &str, name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: normalize_domain(domain),
            path: "/".to_string(),
            expires: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

type CookieKey = (String, String, String);

fn key_of(cookie: &Cookie) -> CookieKey {
    (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone())
}

/// Thread-safe cookie store keyed by (domain, path, name).
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<HashMap<CookieKey, Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cookie `name` that applies to `domain`.
    ///
    /// Follows the same matching as `header_for`, so cookies set for a parent
    /// domain are found too. When several apply, the one with the most
    /// specific domain wins, then the one with the longest path.
    pub fn get(&self, domain: &str, name: &str) -> Option<Cookie> {
        let host = normalize_domain(domain);
        let now = Utc::now();
        let cookies = self.cookies.lock();
        cookies
            .values()
            .filter(|c| c.name == name && domain_matches(&host, &c.domain) && !c.is_expired(now))
            .max_by_key(|c| (c.domain.len(), c.path.len()))
            .cloned()
    }

    pub fn insert(&self, cookie: Cookie) {
        self.cookies.lock().insert(key_of(&cookie), cookie);
    }

    /// Apply every `Set-Cookie` header value of one response atomically.
    ///
    /// `domain` is the host the response came from; a `Domain` attribute in
    /// the header overrides it. A cookie with an empty value, `Max-Age<=0`
    /// or an `Expires` date in the past is removed.
    pub fn store_set_cookies<'a>(&self, domain: &str, headers: impl IntoIterator<Item = &'a str>) {
        let now = Utc::now();
        let parsed: Vec<Cookie> = headers
            .into_iter()
            .filter_map(|header| parse_set_cookie(domain, header, now))
            .collect();
        if parsed.is_empty() {
            return;
        }
        let mut cookies = self.cookies.lock();
        for cookie in parsed {
            let key = key_of(&cookie);
            if cookie.value.is_empty() || cookie.is_expired(now) {
                cookies.remove(&key);
            } else {
                cookies.insert(key, cookie);
            }
        }
        cookies.retain(|_, c| !c.is_expired(now));
    }

    /// The `Cookie` request header for a request to `domain` and `path`.
    ///
    /// Cookies set for a parent domain are sent to its subdomains; a cookie
    /// is only sent under its own path. Longer paths come first.
    pub fn header_for(&self, domain: &str, path: &str) -> Option<String> {
        let host = normalize_domain(domain);
        let now = Utc::now();
        let cookies = self.cookies.lock();
        let mut matching: Vec<&Cookie> = cookies
            .values()
            .filter(|c| domain_matches(&host, &c.domain) && path_matches(path, &c.path) && !c.is_expired(now))
            .collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| (&a.name, &a.value).cmp(&(&b.name, &b.value)))
        });
        let pairs: Vec<String> = matching.iter().map(|c| format!("{}={}", c.name, c.value)).collect();
        Some(pairs.join("; "))
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cookies.lock().clear();
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    host == cookie_domain
        || host
            .strip_suffix(cookie_domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    let request_path = if request_path.is_empty() { "/" } else { request_path };
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => rest.is_empty() || cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Parse an `Expires` date in the IMF-fixdate form or the older
/// `Wdy, DD-Mon-YYYY HH:MM:SS GMT` form.
fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_set_cookie(origin: &str, header: &str, now: DateTime<Utc>) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = Cookie::new(origin, name, value.trim().trim_matches('"'));
    let mut max_age = None;
    for attr in parts {
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => cookie.domain = normalize_domain(val),
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "max-age" => max_age = val.parse::<i64>().ok().or(max_age),
            "expires" => cookie.expires = parse_expires(val).or(cookie.expires),
            _ => {}
        }
    }
    // Max-Age wins over Expires when both are present.
    if let Some(secs) = max_age {
        cookie.expires = if secs <= 0 {
            Some(DateTime::<Utc>::MIN_UTC)
        } else {
            Duration::try_seconds(secs).and_then(|age| now.checked_add_signed(age))
        };
    }
    Some(cookie)
}

/// Source of the conditional-request token attached to POSTs as `If-Match`.
pub trait ValidationTokenProvider: Send + Sync {
    fn read_current_validation_token(&self) -> Option<String>;
}

/// Provider for sessions that never validate writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValidation;

impl ValidationTokenProvider for NoValidation {
    fn read_current_validation_token(&self) -> Option<String> {
        None
    }
}

/// In-memory validation token that the host updates as saves succeed.
#[derive(Debug, Default)]
pub struct SessionEtag {
    token: RwLock<Option<String>>,
}

impl SessionEtag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl ValidationTokenProvider for SessionEtag {
    fn read_current_validation_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}
