use crate::builder::SessionClientBuilder;
use crate::cookie::CookieStore;
use crate::dispatch::Engine;
use crate::error::HttpError;
use crate::gate::ConcurrencyGate;
use crate::request::RequestBuilder;
use std::sync::Arc;

/// Session-aware HTTP client
///
/// One `SessionClient` is one browser-like session: every call it makes
/// shares the same cookie store and the same concurrency gate, and follows
/// the same redirect and retry budgets.
///
/// Use [`SessionClientBuilder`] to construct instances with custom configuration.
///
/// # Thread Safety
///
/// `SessionClient` is `Clone + Send + Sync`. Clones are handles to the same
/// session; cloning is cheap.
///
/// # Example
///
/// ```ignore
/// let client = SessionClient::builder().build()?;
///
/// // First call stores the session cookies (including `csrf`) ...
/// client.get("https://alexa.amazon.com/api/bootstrap").send().await?;
///
/// // ... and later calls to the same host carry them automatically.
/// let routines: Vec<Routine> = client
///     .get("https://alexa.amazon.com/api/behaviors/v2/automations")
///     .send_json()
///     .await?;
/// ```
#[derive(Clone)]
pub struct SessionClient {
    pub(crate) engine: Arc<Engine>,
}

impl SessionClient {
    /// Create a client with the default configuration
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be initialized
    pub fn new() -> Result<Self, HttpError> {
        SessionClientBuilder::new().build()
    }

    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::new()
    }

    /// Create a GET request builder
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    /// Create a POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PUT, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::DELETE, url)
    }

    /// Create a request builder for any method.
    ///
    /// `url` must be absolute; a malformed URL is reported by the first
    /// `send*` call on the returned builder.
    pub fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.engine.clone(), method, url)
    }

    /// The session cookie store
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieStore> {
        self.engine.cookies()
    }

    /// The gate throttling `send_gated*` and the blocking client
    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        self.engine.gate()
    }

    /// Stop the session.
    ///
    /// Pending retry pauses end with `HttpError::Interrupted`, as do gated
    /// calls that are waiting for or later ask for a permit. Attempts already
    /// on the wire run to completion.
    pub fn shutdown(&self) {
        tracing::debug!("session client shutting down");
        self.engine.shutdown();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.engine.is_shut_down()
    }
}
