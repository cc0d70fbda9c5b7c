//! Blocking facade over [`SessionClient`].
//!
//! Every call goes through the concurrency gate: at most `sync_permits`
//! blocking calls are in flight at once, and a call that ends in a transport
//! failure is re-run once (see `SessionClientConfig::gated_outer_retry`).
//!
//! The client owns a small multi-threaded tokio runtime. Do not use it from
//! inside an async context; `block_on` panics there.

use crate::builder::SessionClientBuilder;
use crate::client::SessionClient;
use crate::config::SessionClientConfig;
use crate::cookie::CookieStore;
use crate::decode::{Json, ResponseShape};
use crate::error::HttpError;
use crate::request::{Content, FailMode, RequestBuilder};
use crate::response::ResponseEnvelope;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::runtime::Runtime;

const RUNTIME_WORKER_THREADS: usize = 2;

/// Blocking session client
///
/// Cloning shares the runtime and the session.
#[derive(Clone)]
pub struct BlockingClient {
    runtime: Arc<Runtime>,
    client: SessionClient,
}

impl BlockingClient {
    /// Create a blocking client with the default configuration
    ///
    /// # Errors
    /// Returns `HttpError::Runtime` if the runtime cannot start, or any
    /// [`SessionClientBuilder::build`] error
    pub fn new() -> Result<Self, HttpError> {
        Self::from_builder(SessionClientBuilder::new())
    }

    /// Create a blocking client from a configuration
    ///
    /// # Errors
    /// Same as [`new`](Self::new)
    pub fn with_config(config: SessionClientConfig) -> Result<Self, HttpError> {
        Self::from_builder(SessionClientBuilder::with_config(config))
    }

    /// Start the runtime and build the client from `builder` inside it
    ///
    /// # Errors
    /// Same as [`new`](Self::new)
    pub fn from_builder(builder: SessionClientBuilder) -> Result<Self, HttpError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKER_THREADS)
            .thread_name("session-http-blocking")
            .enable_all()
            .build()
            .map_err(HttpError::Runtime)?;

        let client = {
            let _guard = runtime.enter();
            builder.build()?
        };

        Ok(Self {
            runtime: Arc::new(runtime),
            client,
        })
    }

    pub fn get(&self, url: &str) -> BlockingRequestBuilder {
        self.request(http::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> BlockingRequestBuilder {
        self.request(http::Method::POST, url)
    }

    pub fn put(&self, url: &str) -> BlockingRequestBuilder {
        self.request(http::Method::PUT, url)
    }

    pub fn delete(&self, url: &str) -> BlockingRequestBuilder {
        self.request(http::Method::DELETE, url)
    }

    pub fn request(&self, method: http::Method, url: &str) -> BlockingRequestBuilder {
        BlockingRequestBuilder {
            runtime: self.runtime.clone(),
            inner: self.client.request(method, url),
        }
    }

    /// The async client sharing this session
    #[must_use]
    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieStore> {
        self.client.cookies()
    }

    /// See [`SessionClient::shutdown`]
    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

/// Request builder whose `send*` methods block the calling thread.
///
/// Configuration methods mirror [`RequestBuilder`].
#[must_use = "BlockingRequestBuilder does nothing until .send() is called"]
pub struct BlockingRequestBuilder {
    runtime: Arc<Runtime>,
    inner: RequestBuilder,
}

impl BlockingRequestBuilder {
    fn map(self, f: impl FnOnce(RequestBuilder) -> RequestBuilder) -> Self {
        Self {
            runtime: self.runtime,
            inner: f(self.inner),
        }
    }

    pub fn header(self, name: &str, value: &str) -> Self {
        self.map(|b| b.header(name, value))
    }

    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.map(|b| b.headers(headers))
    }

    pub fn retry(self, retry: bool) -> Self {
        self.map(|b| b.retry(retry))
    }

    pub fn fail_mode(self, mode: FailMode) -> Self {
        self.map(|b| b.fail_mode(mode))
    }

    pub fn redirect(self, follow: bool) -> Self {
        self.map(|b| b.redirect(follow))
    }

    pub fn with_content(self, content: impl Into<Content>) -> Self {
        self.map(|b| b.with_content(content))
    }

    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        self.map(|b| b.json(body))
    }

    pub fn form(self, fields: &[(&str, &str)]) -> Self {
        self.map(|b| b.form(fields))
    }

    pub fn with_json(self, is_json: bool) -> Self {
        self.map(|b| b.with_json(is_json))
    }

    /// Block until the gated call resolves.
    ///
    /// # Errors
    /// Same as [`RequestBuilder::send_gated`]
    pub fn send(self) -> Result<ResponseEnvelope, HttpError> {
        self.runtime.block_on(self.inner.send_gated())
    }

    /// Block until the gated call resolves, then convert into `S`.
    ///
    /// # Errors
    /// Same as [`RequestBuilder::send_gated_as`]
    pub fn send_as<S: ResponseShape>(self) -> Result<S, HttpError> {
        self.runtime.block_on(self.inner.send_gated_as::<S>())
    }

    /// Block until the gated call resolves, then decode the body as JSON.
    ///
    /// # Errors
    /// Same as [`send_as`](Self::send_as) with [`Json<T>`]
    pub fn send_json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        self.send_as::<Json<T>>().map(Json::into_inner)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::dispatch::tests::{MockTransport, respond};
    use serde::Deserialize;
    use std::time::Duration;
    use tower::util::BoxCloneService;

    fn blocking_client(mock: &MockTransport) -> BlockingClient {
        BlockingClient::from_builder(
            SessionClientBuilder::with_config(SessionClientConfig::for_testing())
                .transport_service(BoxCloneService::new(mock.clone())),
        )
        .unwrap()
    }

    #[test]
    fn test_blocking_send() {
        let mock = MockTransport::new(|_, _| respond(200, &[], "hello"));
        let client = blocking_client(&mock);

        let envelope = client
            .post("https://example.com/")
            .header("x-test", "1")
            .with_content("a=b")
            .send()
            .unwrap();

        assert_eq!(envelope.body(), "hello");
        let seen = mock.seen();
        let seen = &seen[0];
        assert_eq!(seen.method, http::Method::POST);
        assert_eq!(seen.headers["x-test"], "1");
        assert_eq!(seen.headers["content-type"], "application/x-www-form-urlencoded");
        assert_eq!(seen.body.as_ref(), b"a=b");
    }

    #[test]
    fn test_blocking_send_json() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Reply {
            ok: bool,
        }

        let mock = MockTransport::new(|_, _| {
            respond(200, &[("content-type", "application/json")], r#"{"ok":true}"#)
        });
        let client = blocking_client(&mock);

        let reply: Reply = client.get("https://example.com/").send_json().unwrap();
        assert_eq!(reply, Reply { ok: true });
    }

    #[test]
    fn test_gate_limits_concurrent_blocking_calls() {
        let mock =
            MockTransport::new(|_, _| respond(200, &[], "")).with_delay(Duration::from_millis(200));
        let client = blocking_client(&mock);

        let threads: Vec<_> = (0..3)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.get("https://example.com/slow").send())
            })
            .collect();
        for thread in threads {
            thread.join().unwrap().unwrap();
        }

        assert_eq!(mock.calls(), 3);
        assert!(mock.peak_in_flight() <= 2, "peak {}", mock.peak_in_flight());
        assert_eq!(client.client().gate().available(), 2);
    }

    #[test]
    fn test_blocking_transport_failure_rerun_once() {
        let mock = MockTransport::new(|_, _| {
            Err(HttpError::Transport(Box::new(std::io::Error::other("reset"))))
        });
        let client = blocking_client(&mock);

        let result = client.get("https://example.com/").retry(false).send();

        assert!(matches!(result, Err(HttpError::Aborted { .. })));
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn test_blocking_shutdown() {
        let mock = MockTransport::new(|_, _| respond(200, &[], ""));
        let client = blocking_client(&mock);
        client.shutdown();

        let result = client.get("https://example.com/").send();
        assert!(matches!(result, Err(HttpError::Interrupted)));
        assert!(client.cookies().is_empty());
    }
}
