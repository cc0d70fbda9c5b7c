use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("cf-session-http/", env!("CARGO_PKG_VERSION"));

/// Number of `Location` hops a single call may follow
pub const DEFAULT_MAX_REDIRECTS: u32 = 30;

/// Number of re-issues after the initial attempt (4 attempts total)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed pause between retry attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Permits in the gate guarding the synchronous entry points
pub const DEFAULT_SYNC_PERMITS: usize = 2;

/// Header whose presence on a 400 response marks an expired server-side queue
pub const DEFAULT_QUEUE_EXPIRED_HEADER: &str = "x-queue-expired";

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
/// Redirect targets are always upgraded to `https`, so this only matters for
/// the URL a caller passes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    AllowInsecureHttp,
}

/// Session client configuration.
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```yaml
/// request_timeout: 15s
/// retry_interval: 500ms
/// default_headers:
///   accept-language: de-DE
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionClientConfig {
    /// Per-attempt timeout. A timed-out attempt counts as aborted (status 0).
    #[serde(default = "default_request_timeout", with = "crate::serde_duration")]
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// User-Agent header value, applied unless the request sets its own
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers stamped on every attempt unless the request sets them
    #[serde(default = "default_headers")]
    pub default_headers: BTreeMap<String, String>,

    /// Redirect budget per logical call
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Retry budget per logical call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each retry
    #[serde(default = "default_retry_interval", with = "crate::serde_duration")]
    pub retry_interval: Duration,

    /// Capacity of the gate around the synchronous entry points
    #[serde(default = "default_sync_permits")]
    pub sync_permits: usize,

    /// Re-run a whole gated call once when it ends in a transport failure.
    ///
    /// This sits on top of the engine's own retry budget, so the same
    /// transient condition can be attempted more than `max_retries + 1` times.
    #[serde(default = "default_true")]
    pub gated_outer_retry: bool,

    /// Sentinel header that turns a 400 into `QueueExpired`
    #[serde(default = "default_queue_expired_header")]
    pub queue_expired_header: String,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Buffer capacity for concurrent request handling (default: 1024)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    #[serde(
        default = "default_pool_idle_timeout",
        with = "crate::serde_duration::option"
    )]
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("accept-language".to_owned(), "en-US".to_owned()),
        ("dnt".to_owned(), "1".to_owned()),
        ("upgrade-insecure-requests".to_owned(), "1".to_owned()),
    ])
}

fn default_max_redirects() -> u32 {
    DEFAULT_MAX_REDIRECTS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_sync_permits() -> usize {
    DEFAULT_SYNC_PERMITS
}

fn default_true() -> bool {
    true
}

fn default_queue_expired_header() -> String {
    DEFAULT_QUEUE_EXPIRED_HEADER.to_owned()
}

fn default_buffer_capacity() -> usize {
    1024
}

#[allow(clippy::unnecessary_wraps)]
fn default_pool_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(90))
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_body_size: default_max_body_size(),
            user_agent: default_user_agent(),
            default_headers: default_headers(),
            max_redirects: default_max_redirects(),
            max_retries: default_max_retries(),
            retry_interval: default_retry_interval(),
            sync_permits: default_sync_permits(),
            gated_outer_retry: true,
            queue_expired_header: default_queue_expired_header(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: default_buffer_capacity(),
            pool_idle_timeout: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

impl SessionClientConfig {
    /// Configuration for tests against local mock servers.
    ///
    /// Plain HTTP is allowed and the retry pause is shortened so budget
    /// exhaustion tests finish quickly. Budgets keep their production values.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 256,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_session_client_config_default() {
        let config = SessionClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.max_redirects, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.sync_permits, 2);
        assert!(config.gated_outer_retry);
        assert_eq!(config.queue_expired_header, "x-queue-expired");
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.tls_roots, TlsRootConfig::WebPki);
        assert_eq!(config.buffer_capacity, 1024);
        assert_eq!(config.pool_idle_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.pool_max_idle_per_host, 32);
        assert_eq!(
            config.default_headers.get("accept-language").map(String::as_str),
            Some("en-US")
        );
    }

    #[test]
    fn test_session_client_config_for_testing() {
        let config = SessionClientConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.retry_interval, Duration::from_millis(10));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionClientConfig = serde_json::from_value(serde_json::json!({
            "request_timeout": "15s",
            "retry_interval": "500ms",
            "transport": "allow_insecure_http",
            "pool_idle_timeout": null
        }))
        .unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry_interval, Duration::from_millis(500));
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.pool_idle_timeout, None);
        assert_eq!(config.max_redirects, 30);
        assert_eq!(config.sync_permits, 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<SessionClientConfig, _> =
            serde_json::from_value(serde_json::json!({ "max_redirect": 5 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serializes_durations_as_humantime() {
        let value = serde_json::to_value(SessionClientConfig::default()).unwrap();
        assert_eq!(value["request_timeout"], "30s");
        assert_eq!(value["retry_interval"], "2s");
        assert_eq!(value["pool_idle_timeout"], "1m 30s");
    }
}
