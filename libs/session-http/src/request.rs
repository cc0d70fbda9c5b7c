use crate::config::TransportSecurity;
use crate::decode::{Json, ResponseShape};
use crate::dispatch::{CallState, Engine};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::ResponseEnvelope;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// How a call reacts to a non-2xx response that is neither a followed
/// redirect nor an expired-queue sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Hand the non-2xx envelope back as a successful result
    Normal,
    /// Fail on the first non-2xx response
    Exception,
    /// Re-issue the request at a fixed interval until the retry budget runs out
    #[default]
    Retry,
}

/// Request body as given to [`RequestBuilder::with_content`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Content {
    /// No body is sent
    #[default]
    Empty,
    /// Pre-encoded text (form data, plain text), sent as-is
    Text(String),
    /// Structured value, serialized as JSON
    Json(serde_json::Value),
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_owned())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<serde_json::Value> for Content {
    fn from(value: serde_json::Value) -> Self {
        Content::Json(value)
    }
}

impl<T: Into<Content>> From<Option<T>> for Content {
    fn from(value: Option<T>) -> Self {
        value.map_or(Content::Empty, Into::into)
    }
}

/// Immutable description of one logical request.
///
/// Every attempt of a call (initial, redirected, retried) is issued from the
/// same descriptor; only the target URI changes on redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: http::Method,
    body: Option<Bytes>,
    is_json: bool,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(
        method: http::Method,
        body: Option<Bytes>,
        is_json: bool,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Self {
        Self {
            method,
            body,
            is_json,
            headers,
        }
    }

    #[must_use]
    pub fn method(&self) -> &http::Method {
        &self.method
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether the body is JSON (drives the default `Content-Type`)
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.is_json
    }

    /// Custom headers in first-insertion order
    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Fluent builder for one logical call
///
/// Created by [`SessionClient::get`](crate::SessionClient::get) and friends.
/// Nothing touches the network until one of the `send*` methods runs; every
/// configuration error (bad URL, bad header, unserializable body) is held
/// back and returned from that call.
///
/// # Example
///
/// ```ignore
/// use session_http::{SessionClient, Json};
///
/// let client = SessionClient::builder().build()?;
///
/// // Follows redirects, retries up to 3 times, decodes JSON
/// let devices: Vec<Device> = client
///     .get("https://alexa.amazon.com/api/devices-v2/device")
///     .send_json()
///     .await?;
///
/// // POST a structured body, fail on the first error status
/// let envelope = client
///     .post("https://alexa.amazon.com/api/behaviors/preview")
///     .json(&routine)
///     .retry(false)
///     .send()
///     .await?;
///
/// // Inspect a 302 instead of following it
/// let envelope = client
///     .get("https://www.amazon.com/ap/signin")
///     .redirect(false)
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    engine: Arc<Engine>,
    method: http::Method,
    target: Result<http::Uri, HttpError>,
    headers: Vec<(HeaderName, HeaderValue)>,
    content: Content,
    json_override: Option<bool>,
    auto_redirect: bool,
    fail_mode: FailMode,
    /// Error captured during building (deferred to `send()`)
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(engine: Arc<Engine>, method: http::Method, url: &str) -> Self {
        let target = validate_url(url, engine.transport_security());
        Self {
            engine,
            method,
            target,
            headers: Vec::new(),
            content: Content::Empty,
            json_override: None,
            auto_redirect: true,
            fail_mode: FailMode::default(),
            error: None,
        }
    }

    /// Set a header, replacing an earlier value for the same name.
    ///
    /// An empty value is ignored. Setting `Cookie` or `csrf` explicitly
    /// suppresses the values the session would otherwise attach.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() || value.is_empty() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                match self.headers.iter_mut().find(|(n, _)| *n == name) {
                    Some(slot) => slot.1 = value,
                    None => self.headers.push((name, value)),
                }
            }
            (Err(e), _) => {
                self.error = Some(HttpError::InvalidHeaderName(e));
            }
            (_, Err(e)) => {
                self.error = Some(HttpError::InvalidHeaderValue(e));
            }
        }
        self
    }

    /// Set several headers, same rules as [`header`](Self::header).
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// `true` (default): retry non-2xx responses up to the retry budget.
    /// `false`: fail on the first one.
    pub fn retry(mut self, retry: bool) -> Self {
        self.fail_mode = if retry {
            FailMode::Retry
        } else {
            FailMode::Exception
        };
        self
    }

    /// Set the fail mode directly; `FailMode::Normal` returns non-2xx
    /// envelopes instead of failing.
    pub fn fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = mode;
        self
    }

    /// `true` (default): follow 3xx responses carrying a `Location`.
    /// `false`: return the 3xx envelope as the result.
    pub fn redirect(mut self, follow: bool) -> Self {
        self.auto_redirect = follow;
        self
    }

    /// Set the request body. Resets any earlier [`with_json`](Self::with_json).
    pub fn with_content(mut self, content: impl Into<Content>) -> Self {
        self.content = content.into();
        self.json_override = None;
        self
    }

    /// Serialize `body` as the JSON request body.
    ///
    /// A serialization failure is returned by `send*` as `HttpError::Encode`.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.with_content(Content::Json(value)),
            Err(e) => self.deferred(HttpError::Encode(e)),
        }
    }

    /// Url-encode `fields` as a text body.
    ///
    /// An encoding failure is returned by `send*` as `HttpError::FormEncode`.
    pub fn form(self, fields: &[(&str, &str)]) -> Self {
        match serde_urlencoded::to_string(fields) {
            Ok(encoded) => self.with_content(Content::Text(encoded)),
            Err(e) => self.deferred(HttpError::FormEncode(e)),
        }
    }

    /// Override whether the body is treated as JSON. Call after `with_content`.
    pub fn with_json(mut self, is_json: bool) -> Self {
        self.json_override = Some(is_json);
        self
    }

    fn deferred(mut self, err: HttpError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    fn into_call(
        self,
    ) -> Result<(Arc<Engine>, RequestDescriptor, http::Uri, CallState), HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let uri = self.target?;

        let (body, detected_json) = match self.content {
            Content::Empty => (None, false),
            Content::Text(text) => (Some(Bytes::from(text)), false),
            Content::Json(value) => (Some(Bytes::from(serde_json::to_vec(&value)?)), true),
        };
        let is_json = self.json_override.unwrap_or(detected_json);

        let state = self.engine.initial_state(self.auto_redirect, self.fail_mode);
        let descriptor = RequestDescriptor::new(self.method, body, is_json, self.headers);
        Ok((self.engine, descriptor, uri, state))
    }

    /// Send the request and return the final envelope.
    ///
    /// # Errors
    ///
    /// Returns the builder's deferred error, or the terminal error of the
    /// call: `TooManyRedirects`, `QueueExpired`, `HttpStatus`, `Aborted` or
    /// `Interrupted`.
    pub async fn send(self) -> Result<ResponseEnvelope, HttpError> {
        let (engine, descriptor, uri, state) = self.into_call()?;
        engine.dispatch(&descriptor, uri, state).await
    }

    /// Send the request and convert the final envelope into `S`.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), plus the decode errors of `S`.
    pub async fn send_as<S: ResponseShape>(self) -> Result<S, HttpError> {
        S::from_envelope(self.send().await?)
    }

    /// Send the request and decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`send_as`](Self::send_as) with [`Json<T>`].
    pub async fn send_json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        self.send_as::<Json<T>>().await.map(Json::into_inner)
    }

    /// Send through the client's concurrency gate.
    ///
    /// Waits for a gate permit and holds it until the call resolves. A call
    /// that ends in a transport failure is re-run once when
    /// `gated_outer_retry` is enabled.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send); `Interrupted` if the gate was closed.
    pub async fn send_gated(self) -> Result<ResponseEnvelope, HttpError> {
        let (engine, descriptor, uri, state) = self.into_call()?;
        engine.dispatch_gated(&descriptor, uri, state).await
    }

    /// [`send_gated`](Self::send_gated) followed by conversion into `S`.
    ///
    /// # Errors
    ///
    /// Same as [`send_gated`](Self::send_gated), plus the decode errors of `S`.
    pub async fn send_gated_as<S: ResponseShape>(self) -> Result<S, HttpError> {
        S::from_envelope(self.send_gated().await?)
    }
}

/// Validate URL and scheme against transport security configuration.
///
/// Uses proper `http::Uri` parsing instead of string prefix matching.
/// Returns the parsed URI on success for use in request building.
fn validate_url(url: &str, transport: TransportSecurity) -> Result<http::Uri, HttpError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    let Some(scheme) = uri.scheme_str() else {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        });
    };

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match (scheme, transport) {
        ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => Ok(uri),
        ("http", TransportSecurity::TlsOnly) => Err(HttpError::InvalidScheme {
            scheme: "http".to_owned(),
            reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
        }),
        (other, _) => Err(HttpError::InvalidScheme {
            scheme: other.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::SessionClientConfig;
    use crate::dispatch::tests::test_engine;
    use serde_json::json;

    fn builder(url: &str) -> RequestBuilder {
        RequestBuilder::new(
            test_engine(SessionClientConfig::for_testing()),
            http::Method::POST,
            url,
        )
    }

    #[test]
    fn test_validate_url() {
        let ok = validate_url("https://example.com/api", TransportSecurity::TlsOnly).unwrap();
        assert_eq!(ok.host(), Some("example.com"));
        assert!(validate_url("http://localhost:8080/", TransportSecurity::AllowInsecureHttp).is_ok());

        assert!(matches!(
            validate_url("http://example.com", TransportSecurity::TlsOnly),
            Err(HttpError::InvalidScheme { .. })
        ));
        assert!(matches!(
            validate_url("ftp://example.com/file", TransportSecurity::AllowInsecureHttp),
            Err(HttpError::InvalidScheme { scheme, .. }) if scheme == "ftp"
        ));
        assert!(matches!(
            validate_url("/relative/path", TransportSecurity::TlsOnly),
            Err(HttpError::InvalidUri { kind: InvalidUriKind::MissingScheme, .. })
        ));
        assert!(matches!(
            validate_url("example.com/path", TransportSecurity::TlsOnly),
            Err(HttpError::InvalidUri { .. })
        ));
        assert!(matches!(
            validate_url("https://exa mple.com", TransportSecurity::TlsOnly),
            Err(HttpError::InvalidUri { kind: InvalidUriKind::ParseError, .. })
        ));
    }

    #[tokio::test]
    async fn test_header_overwrites_and_skips_empty() {
        let (_, descriptor, _, _) = builder("http://example.com/")
            .header("x-token", "one")
            .header("accept", "text/html")
            .header("x-token", "two")
            .header("x-empty", "")
            .into_call()
            .unwrap();

        let names: Vec<_> = descriptor.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["x-token", "accept"]);
        assert_eq!(
            descriptor.header(&HeaderName::from_static("x-token")).unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn test_invalid_header_deferred_to_send() {
        let result = builder("http://example.com/")
            .header("bad header", "x")
            .header("x-later", "fine")
            .send()
            .await;
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_deferred_to_send() {
        let result = builder("not a url").header("x", "y").send().await;
        assert!(matches!(result, Err(HttpError::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_content_kinds() {
        let (_, empty, _, _) = builder("http://example.com/").into_call().unwrap();
        assert!(empty.body().is_none());
        assert!(!empty.is_json());

        let (_, text, _, _) = builder("http://example.com/")
            .with_content("a=1&b=2")
            .into_call()
            .unwrap();
        assert_eq!(text.body().unwrap().as_ref(), b"a=1&b=2");
        assert!(!text.is_json());

        let (_, structured, _, _) = builder("http://example.com/")
            .json(&json!({"type": "Alexa.Speak"}))
            .into_call()
            .unwrap();
        assert_eq!(structured.body().unwrap().as_ref(), br#"{"type":"Alexa.Speak"}"#);
        assert!(structured.is_json());

        let (_, overridden, _, _) = builder("http://example.com/")
            .with_content(r#"{"raw":true}"#)
            .with_json(true)
            .into_call()
            .unwrap();
        assert!(overridden.is_json());

        let (_, none, _, _) = builder("http://example.com/")
            .with_content(None::<String>)
            .into_call()
            .unwrap();
        assert!(none.body().is_none());
    }

    #[tokio::test]
    async fn test_form_body() {
        let (_, descriptor, _, _) = builder("http://example.com/")
            .form(&[("email", "a@b.c"), ("password", "p w")])
            .into_call()
            .unwrap();
        assert_eq!(
            descriptor.body().unwrap().as_ref(),
            b"email=a%40b.c&password=p+w"
        );
        assert!(!descriptor.is_json());
    }

    #[tokio::test]
    async fn test_flags_map_to_call_state() {
        let (_, _, _, state) = builder("http://example.com/").into_call().unwrap();
        assert!(state.auto_redirect());
        assert_eq!(state.fail_mode(), FailMode::Retry);
        assert_eq!(state.redirect_budget(), 30);
        assert_eq!(state.retry_budget(), 3);

        let (_, _, _, state) = builder("http://example.com/")
            .retry(false)
            .redirect(false)
            .into_call()
            .unwrap();
        assert!(!state.auto_redirect());
        assert_eq!(state.fail_mode(), FailMode::Exception);

        let (_, _, _, state) = builder("http://example.com/")
            .fail_mode(FailMode::Normal)
            .into_call()
            .unwrap();
        assert_eq!(state.fail_mode(), FailMode::Normal);
    }

    #[test]
    fn test_descriptor_equality() {
        let a = RequestDescriptor::new(
            http::Method::GET,
            None,
            false,
            vec![(HeaderName::from_static("x-a"), HeaderValue::from_static("1"))],
        );
        let b = a.clone();
        assert_eq!(a, b);

        let c = RequestDescriptor::new(http::Method::GET, Some(Bytes::from_static(b"x")), false, vec![]);
        assert_ne!(a, c);
    }
}
