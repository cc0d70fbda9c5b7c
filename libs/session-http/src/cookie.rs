//! Session cookie storage shared by every call of a client.
//!
//! Implements the subset of RFC 6265 a browser-like session needs: `Domain`,
//! `Path`, `Expires`, `Max-Age`, `Secure` and `HttpOnly`. Cookies are
//! bucketed by domain in a [`DashMap`]; a merge holds the bucket's shard lock
//! for the whole read-modify-write, so concurrent responses from the same
//! host never lose each other's updates.

use dashmap::DashMap;
use http::{HeaderValue, Uri};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cookie whose value is mirrored into a bare request header of the same name.
pub const CSRF_COOKIE: &str = "csrf";

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercase host or domain, without a leading dot
    pub domain: String,
    /// Set when the cookie had no `Domain` attribute: only the exact host matches
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies
    pub expires: Option<SystemTime>,
}

impl Cookie {
    /// Create a host-only session cookie for `domain` with path `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: &str) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(domain),
            host_only: true,
            path: "/".to_owned(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }

    /// Parse one `Set-Cookie` header value received from `uri`.
    ///
    /// Returns `None` when the value has no `name=value` pair, has an empty
    /// name, or names a `Domain` the responding host does not belong to.
    /// A `Domain` must contain an embedded dot (`local` excepted) and is
    /// refused outright when the responding host is an IP address.
    /// Unknown attributes are ignored.
    #[must_use]
    pub fn parse(header: &str, uri: &Uri) -> Option<Self> {
        let host = uri.host()?.to_ascii_lowercase();
        let mut parts = header.split(';').map(str::trim);

        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.to_owned(),
            value: value.trim().to_owned(),
            domain: host.clone(),
            host_only: true,
            path: default_path(uri.path()),
            secure: false,
            http_only: false,
            expires: None,
        };
        let mut max_age: Option<i64> = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "domain" if !val.is_empty() => {
                    let domain = normalize_domain(val);
                    if is_ip_literal(&host)
                        || !has_embedded_dot(&domain)
                        || !domain_matches(&host, &domain)
                    {
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_owned(),
                "expires" => {
                    if let Ok(at) = httpdate::parse_http_date(val) {
                        cookie.expires = Some(at);
                    }
                }
                "max-age" => max_age = val.parse().ok(),
                _ => {}
            }
        }

        // Max-Age wins over Expires
        if let Some(secs) = max_age {
            cookie.expires = Some(match u64::try_from(secs) {
                Ok(secs) if secs > 0 => SystemTime::now() + Duration::from_secs(secs),
                _ => UNIX_EPOCH,
            });
        }

        Some(cookie)
    }

    /// Whether the cookie has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// Whether this cookie should be sent to `uri`.
    #[must_use]
    pub fn matches(&self, uri: &Uri, now: SystemTime) -> bool {
        let Some(host) = uri.host() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        if self.is_expired(now) {
            return false;
        }
        if self.secure && uri.scheme_str() != Some("https") {
            return false;
        }
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok && path_matches(uri.path(), &self.path)
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Concurrent cookie store keyed by cookie domain.
///
/// One instance is shared by all calls of a client (and may be shared across
/// clients) through an `Arc`.
#[derive(Debug, Default)]
pub struct CookieStore {
    buckets: DashMap<String, Vec<Cookie>>,
}

impl CookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `Set-Cookie` values received from `uri`.
    ///
    /// Values that are not valid UTF-8 or fail to parse are skipped. Returns
    /// the number of cookies stored, replaced or deleted.
    pub fn merge<'a, I>(&self, uri: &Uri, set_cookies: I) -> usize
    where
        I: IntoIterator<Item = &'a HeaderValue>,
    {
        let mut merged = 0;
        for raw in set_cookies {
            let parsed = raw.to_str().ok().and_then(|v| Cookie::parse(v, uri));
            match parsed {
                Some(cookie) => {
                    self.add(cookie);
                    merged += 1;
                }
                None => {
                    tracing::debug!(uri = %uri, "ignoring malformed Set-Cookie header");
                }
            }
        }
        merged
    }

    /// Store a cookie, replacing any cookie with the same name, domain and path.
    ///
    /// An already-expired cookie deletes its slot instead.
    pub fn add(&self, cookie: Cookie) {
        let now = SystemTime::now();
        let mut bucket = self.buckets.entry(cookie.domain.clone()).or_default();
        bucket.retain(|c| !c.is_expired(now));

        let existing = bucket.iter().position(|c| c.same_slot(&cookie));
        match (existing, cookie.is_expired(now)) {
            (Some(idx), true) => {
                bucket.remove(idx);
            }
            (Some(idx), false) => bucket[idx] = cookie,
            (None, false) => bucket.push(cookie),
            (None, true) => {}
        }
    }

    /// All live cookies that should be sent to `uri`, longest path first.
    #[must_use]
    pub fn cookies_for(&self, uri: &Uri) -> Vec<Cookie> {
        let Some(host) = uri.host() else {
            return Vec::new();
        };
        let host = host.to_ascii_lowercase();
        let now = SystemTime::now();

        let mut found: Vec<Cookie> = self
            .buckets
            .iter()
            .filter(|bucket| domain_matches(&host, bucket.key()))
            .flat_map(|bucket| {
                bucket
                    .value()
                    .iter()
                    .filter(|c| c.matches(uri, now))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|c| std::cmp::Reverse(c.path.len()));
        found
    }

    /// Value of the live cookie called `name` that applies to `uri`.
    #[must_use]
    pub fn get(&self, uri: &Uri, name: &str) -> Option<String> {
        self.cookies_for(uri)
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Snapshot of every live cookie in the store.
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        let now = SystemTime::now();
        self.buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .value()
                    .iter()
                    .filter(|c| !c.is_expired(now))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let now = SystemTime::now();
        self.buckets
            .iter()
            .map(|bucket| bucket.value().iter().filter(|c| !c.is_expired(now)).count())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `Cookie` request header value for `cookies`, `name=value` pairs joined by `"; "`.
pub(crate) fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// `Domain=com` or `Domain=com.` would scope a cookie to a whole TLD.
fn has_embedded_dot(domain: &str) -> bool {
    domain == "local" || domain.trim_end_matches('.').contains('.')
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<std::net::IpAddr>()
        .is_ok()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    let request_path = if request_path.is_empty() { "/" } else { request_path };
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

/// RFC 6265 section 5.1.4 default-path of a request path.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_owned();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => request_path[..idx].to_owned(),
    }
}
