use crate::client::SessionClient;
use crate::config::{SessionClientConfig, TlsRootConfig, TransportSecurity};
use crate::cookie::CookieStore;
use crate::dispatch::{Engine, TransportService};
use crate::error::HttpError;
use crate::layers::DefaultHeadersLayer;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Builder for constructing a [`SessionClient`].
///
/// Every [`SessionClientConfig`] field has a setter. The cookie store and
/// the transport can be replaced, which lets several clients share one
/// session or lets tests run without a network.
pub struct SessionClientBuilder {
    config: SessionClientConfig,
    cookies: Option<Arc<CookieStore>>,
    transport: Option<TransportService>,
}

impl SessionClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SessionClientConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: SessionClientConfig) -> Self {
        Self {
            config,
            cookies: None,
            transport: None,
        }
    }

    /// Set the per-attempt timeout
    ///
    /// Each redirect or retry attempt gets its own timeout. An attempt that
    /// times out counts as aborted and follows the retry policy.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add or replace one session-wide default header
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Replace all session-wide default headers
    #[must_use]
    pub fn default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.config.default_headers = headers;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the pause between retry attempts
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Set how many gated calls may be in flight at once (clamped to 1)
    #[must_use]
    pub fn sync_permits(mut self, permits: usize) -> Self {
        self.config.sync_permits = permits.max(1);
        self
    }

    /// Enable or disable the single re-run of gated calls on transport failure
    #[must_use]
    pub fn gated_outer_retry(mut self, enabled: bool) -> Self {
        self.config.gated_outer_retry = enabled;
        self
    }

    /// Set the header that marks a 400 response as an expired server queue
    #[must_use]
    pub fn queue_expired_header(mut self, name: impl Into<String>) -> Self {
        self.config.queue_expired_header = name.into();
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set transport security mode
    ///
    /// Use `TransportSecurity::AllowInsecureHttp` only for testing with mock servers.
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Equivalent to `.transport(TransportSecurity::AllowInsecureHttp)`.
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    ///
    /// # Compile-time Safety
    ///
    /// This method is only available in debug builds or when the `allow-insecure-http`
    /// feature is explicitly enabled.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "session_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Set the TLS root certificate strategy
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Set the buffer capacity for concurrent request handling
    ///
    /// A capacity of 0 is clamped to 1.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Set the idle connection timeout for the connection pool
    ///
    /// Set to `None` to disable idle timeout (connections kept indefinitely).
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Use an existing cookie store instead of a fresh one.
    ///
    /// Clients built with the same store share one session.
    #[must_use]
    pub fn cookie_store(mut self, cookies: Arc<CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// Replace the hyper transport with `service`.
    ///
    /// Timeout and default headers still wrap it; response decompression
    /// does not.
    #[must_use]
    pub fn transport_service(mut self, service: TransportService) -> Self {
        self.transport = Some(service);
        self
    }

    /// Build the client
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails, a default header or the
    /// sentinel header name is invalid
    pub fn build(self) -> Result<SessionClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }
        if !self.config.gated_outer_retry {
            tracing::debug!("outer retry of gated calls disabled");
        }

        let timeout = self.config.request_timeout;
        let headers_layer = DefaultHeadersLayer::try_new(
            std::iter::once(("user-agent", self.config.user_agent.as_str())).chain(
                self.config
                    .default_headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            ),
        )?;

        // Request flow (outer → inner):
        //   Buffer → Timeout → DefaultHeaders → Decompression → hyper_client
        //
        // Redirects, retries and cookies are driven by the dispatch engine
        // above the buffer, one attempt per call into this stack.
        let transport: TransportService = match self.transport {
            Some(injected) => ServiceBuilder::new()
                .layer(TimeoutLayer::new(timeout))
                .layer(headers_layer)
                .service(injected)
                .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
                .boxed_clone(),
            None => {
                let https = tls::https_connector(self.config.tls_roots, self.config.transport)?;

                // pool_timer is required for pool_idle_timeout to work
                let mut client_builder = Client::builder(TokioExecutor::new());
                client_builder
                    .pool_timer(TokioTimer::new())
                    .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
                    .http2_only(false);
                if let Some(idle_timeout) = self.config.pool_idle_timeout {
                    client_builder.pool_idle_timeout(idle_timeout);
                }
                let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

                ServiceBuilder::new()
                    .layer(TimeoutLayer::new(timeout))
                    .layer(headers_layer)
                    .layer(DecompressionLayer::new())
                    .service(hyper_client)
                    .map_response(map_decompression_response)
                    .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
                    .boxed_clone()
            }
        };

        let cookies = self.cookies.unwrap_or_default();
        let engine = Engine::new(transport, &self.config, cookies)?;
        Ok(SessionClient {
            engine: Arc::new(engine),
        })
    }
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map tower errors to `HttpError` with actual timeout duration
///
/// Attempts to extract existing `HttpError` from the boxed error before
/// wrapping as `Transport`.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

/// Map the decompression response to our boxed response body type.
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}
