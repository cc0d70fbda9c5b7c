//! Redirect/retry state machine for one logical call.
//!
//! Every attempt of a call goes through [`Engine::dispatch`]:
//!
//! ```text
//! DISPATCHED ──> SUCCEEDED
//!     │  ▲   ──> FAILED
//!     │  └── REDIRECTING (redirect budget - 1, new URI)
//!     └───── RETRYING    (retry budget - 1, same URI, after a pause)
//! ```
//!
//! The per-call budgets travel in an immutable [`CallState`] that is replaced,
//! never mutated, between attempts. Concurrent calls share only the cookie
//! store and the concurrency gate.

use crate::config::{SessionClientConfig, TransportSecurity};
use crate::cookie::{CSRF_COOKIE, CookieStore, cookie_header};
use crate::error::HttpError;
use crate::gate::ConcurrencyGate;
use crate::request::{FailMode, RequestDescriptor};
use crate::response::{ResponseBody, ResponseEnvelope};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::buffer::Buffer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Type alias for the future type of the inner service
pub(crate) type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Buffer<Req, F> in tower 0.5 where Req is the request type and F is the service future type
pub(crate) type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Type-erased single-attempt transport.
///
/// The production stack is timeout, default headers and decompression over
/// a pooled hyper client; tests plug in their own service here.
pub type TransportService = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Remaining budgets and flags of one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallState {
    auto_redirect: bool,
    fail_mode: FailMode,
    redirect_budget: u32,
    retry_budget: u32,
}

impl CallState {
    #[must_use]
    pub fn new(auto_redirect: bool, fail_mode: FailMode, redirect_budget: u32, retry_budget: u32) -> Self {
        Self {
            auto_redirect,
            fail_mode,
            redirect_budget,
            retry_budget,
        }
    }

    #[must_use]
    pub fn auto_redirect(&self) -> bool {
        self.auto_redirect
    }

    #[must_use]
    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    #[must_use]
    pub fn redirect_budget(&self) -> u32 {
        self.redirect_budget
    }

    #[must_use]
    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// State for the attempt after a followed redirect
    #[must_use]
    pub fn after_redirect(self) -> Self {
        Self {
            redirect_budget: self.redirect_budget.saturating_sub(1),
            ..self
        }
    }

    /// State for the attempt after a retry pause
    #[must_use]
    pub fn after_retry(self) -> Self {
        Self {
            retry_budget: self.retry_budget.saturating_sub(1),
            ..self
        }
    }
}

/// Engine-wide settings consulted by [`decide`] and the dispatch loop.
#[derive(Debug, Clone)]
pub(crate) struct DispatchPolicy {
    pub(crate) max_redirects: u32,
    pub(crate) max_retries: u32,
    pub(crate) retry_interval: Duration,
    pub(crate) queue_expired_header: HeaderName,
    pub(crate) max_body_size: usize,
    pub(crate) gated_outer_retry: bool,
    pub(crate) transport_security: TransportSecurity,
}

impl DispatchPolicy {
    pub(crate) fn from_config(config: &SessionClientConfig) -> Result<Self, HttpError> {
        Ok(Self {
            max_redirects: config.max_redirects,
            max_retries: config.max_retries,
            retry_interval: config.retry_interval,
            queue_expired_header: HeaderName::try_from(config.queue_expired_header.as_str())?,
            max_body_size: config.max_body_size,
            gated_outer_retry: config.gated_outer_retry,
            transport_security: config.transport,
        })
    }
}

/// What happens after an attempt completes.
#[derive(Debug)]
pub(crate) enum Transition {
    Succeeded(ResponseEnvelope),
    Redirect(Uri),
    Retry,
    Failed(HttpError),
}

/// Apply the transition rules to one completed attempt.
///
/// `attempt` is `Err` when no response was received (status 0). Rules are
/// checked in order: success, followable redirect, expired queue, then the
/// fail mode against the remaining retry budget.
pub(crate) fn decide(
    state: CallState,
    attempt: Result<ResponseEnvelope, HttpError>,
    uri: &Uri,
    policy: &DispatchPolicy,
) -> Transition {
    let envelope = match attempt {
        Ok(envelope) => envelope,
        Err(err) => {
            return if state.fail_mode == FailMode::Retry && state.retry_budget > 0 {
                Transition::Retry
            } else {
                Transition::Failed(HttpError::aborted(uri, err))
            };
        }
    };

    let status = envelope.status();
    if status.is_success() {
        return Transition::Succeeded(envelope);
    }

    if status.is_redirection()
        && let Some(target) = redirect_target(uri, &envelope)
    {
        if !state.auto_redirect {
            return Transition::Succeeded(envelope);
        }
        if state.redirect_budget == 0 {
            return Transition::Failed(HttpError::TooManyRedirects {
                max: policy.max_redirects,
                uri: uri.to_string(),
            });
        }
        return Transition::Redirect(target);
    }

    if status == StatusCode::BAD_REQUEST
        && envelope.headers().contains_key(&policy.queue_expired_header)
    {
        return Transition::Failed(HttpError::QueueExpired {
            uri: uri.to_string(),
        });
    }

    if state.fail_mode == FailMode::Exception || state.retry_budget == 0 {
        return Transition::Failed(HttpError::HttpStatus {
            status,
            reason: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            body_preview: envelope.body_preview(),
        });
    }

    if state.fail_mode == FailMode::Normal {
        return Transition::Succeeded(envelope);
    }

    Transition::Retry
}

/// Resolve `Location` against `current`, upgrading `http` to `https`.
///
/// Returns `None` when the header is missing or does not resolve to an
/// absolute URI.
fn redirect_target(current: &Uri, envelope: &ResponseEnvelope) -> Option<Uri> {
    let location = envelope.headers().get(LOCATION)?.to_str().ok()?;
    let base = url::Url::parse(&current.to_string()).ok()?;
    let mut target = base.join(location).ok()?;

    if target.scheme() == "http" {
        if target.set_scheme("https").is_err() {
            return None;
        }
        tracing::debug!(location, corrected = %target, "redirect corrected to https");
    }

    target.as_str().parse().ok()
}

/// Build the wire request for one attempt of `descriptor` against `uri`.
///
/// Session cookies are attached unless the caller set `Cookie`; the `csrf`
/// cookie is mirrored into a `csrf` header unless the caller set one.
pub(crate) fn build_request(
    descriptor: &RequestDescriptor,
    uri: &Uri,
    cookies: &CookieStore,
) -> Result<Request<Full<Bytes>>, HttpError> {
    let csrf_header = HeaderName::from_static(CSRF_COOKIE);

    let mut headers = HeaderMap::with_capacity(descriptor.headers().len() + 3);
    for (name, value) in descriptor.headers() {
        headers.insert(name.clone(), value.clone());
    }

    if descriptor.body().is_some() && !headers.contains_key(CONTENT_TYPE) {
        let content_type = if descriptor.is_json() {
            JSON_CONTENT_TYPE
        } else {
            FORM_CONTENT_TYPE
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    let jar = cookies.cookies_for(uri);
    if !headers.contains_key(COOKIE)
        && let Some(value) = cookie_header(&jar)
    {
        headers.insert(COOKIE, HeaderValue::try_from(value)?);
    }
    if !headers.contains_key(&csrf_header)
        && let Some(csrf) = jar.iter().find(|c| c.name == CSRF_COOKIE)
    {
        headers.insert(csrf_header, HeaderValue::try_from(csrf.value.as_str())?);
    }

    let body = descriptor.body().cloned().unwrap_or_default();
    let mut request = Request::new(Full::new(body));
    *request.method_mut() = descriptor.method().clone();
    *request.uri_mut() = uri.clone();
    *request.headers_mut() = headers;
    Ok(request)
}

/// Shared dispatch machinery behind every client handle.
pub(crate) struct Engine {
    service: BufferedService,
    cookies: Arc<CookieStore>,
    gate: ConcurrencyGate,
    shutdown: CancellationToken,
    policy: DispatchPolicy,
}

impl Engine {
    /// Wrap `transport` in a buffer and attach the session state.
    ///
    /// Must be called inside a tokio runtime: the buffer spawns its worker.
    pub(crate) fn new(
        transport: TransportService,
        config: &SessionClientConfig,
        cookies: Arc<CookieStore>,
    ) -> Result<Self, HttpError> {
        let policy = DispatchPolicy::from_config(config)?;
        let service: BufferedService = Buffer::new(transport, config.buffer_capacity.max(1));
        Ok(Self {
            service,
            cookies,
            gate: ConcurrencyGate::new(config.sync_permits),
            shutdown: CancellationToken::new(),
            policy,
        })
    }

    pub(crate) fn initial_state(&self, auto_redirect: bool, fail_mode: FailMode) -> CallState {
        CallState::new(
            auto_redirect,
            fail_mode,
            self.policy.max_redirects,
            self.policy.max_retries,
        )
    }

    pub(crate) fn transport_security(&self) -> TransportSecurity {
        self.policy.transport_security
    }

    pub(crate) fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    pub(crate) fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Interrupt pending retry pauses and close the gate.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
        self.gate.close();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run one logical call to its terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns the `Failed` transition's error, `Interrupted` if a retry
    /// pause was cut short by shutdown, or a request building error.
    pub(crate) async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        mut uri: Uri,
        mut state: CallState,
    ) -> Result<ResponseEnvelope, HttpError> {
        let method = descriptor.method();
        let mut attempt: u32 = 1;

        loop {
            let request = build_request(descriptor, &uri, &self.cookies)?;
            tracing::debug!(
                %method,
                uri = %uri,
                attempt,
                redirects_left = state.redirect_budget,
                retries_left = state.retry_budget,
                "dispatching attempt"
            );

            let outcome = self.send_once(request, &uri).await;
            if let Err(e) = &outcome {
                tracing::debug!(%method, uri = %uri, attempt, error = %e, "attempt aborted");
            }

            match decide(state, outcome, &uri, &self.policy) {
                Transition::Succeeded(envelope) => {
                    tracing::debug!(
                        %method,
                        uri = %uri,
                        status = envelope.status().as_u16(),
                        attempt,
                        "call succeeded"
                    );
                    return Ok(envelope);
                }
                Transition::Redirect(target) => {
                    state = state.after_redirect();
                    tracing::debug!(
                        %method,
                        from = %uri,
                        to = %target,
                        redirects_left = state.redirect_budget,
                        "following redirect"
                    );
                    uri = target;
                }
                Transition::Retry => {
                    tracing::warn!(
                        %method,
                        uri = %uri,
                        attempt,
                        retries_left = state.retry_budget,
                        interval = ?self.policy.retry_interval,
                        "attempt failed, retrying"
                    );
                    self.pause().await?;
                    state = state.after_retry();
                }
                Transition::Failed(err) => {
                    tracing::warn!(%method, uri = %uri, attempt, error = %err, "call failed");
                    return Err(err);
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// [`dispatch`](Self::dispatch) under a gate permit, with one outer
    /// re-run on transport failure when enabled.
    pub(crate) async fn dispatch_gated(
        &self,
        descriptor: &RequestDescriptor,
        uri: Uri,
        state: CallState,
    ) -> Result<ResponseEnvelope, HttpError> {
        let _permit = self.gate.acquire().await?;

        match self.dispatch(descriptor, uri.clone(), state).await {
            Err(err) if err.is_transport() && self.policy.gated_outer_retry => {
                tracing::warn!(
                    uri = %uri,
                    error = %err,
                    "gated call aborted; re-running once, the retry budget may already be spent on the same failure"
                );
                self.dispatch(descriptor, uri, state).await
            }
            outcome => outcome,
        }
    }

    /// One transport attempt: send, merge cookies, read the body.
    ///
    /// Cookies are merged before the body is read so a failing read does
    /// not lose them.
    async fn send_once(
        &self,
        request: Request<Full<Bytes>>,
        uri: &Uri,
    ) -> Result<ResponseEnvelope, HttpError> {
        let mut service = self.service.clone();
        let response = service
            .ready()
            .await
            .map_err(map_buffer_error)?
            .call(request)
            .await
            .map_err(map_buffer_error)?;

        let merged = self.cookies.merge(uri, response.headers().get_all(SET_COOKIE));
        if merged > 0 {
            tracing::debug!(uri = %uri, merged, "merged response cookies");
        }

        ResponseEnvelope::read(response, uri.clone(), self.policy.max_body_size).await
    }

    async fn pause(&self) -> Result<(), HttpError> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(HttpError::Interrupted),
            () = tokio::time::sleep(self.policy.retry_interval) => Ok(()),
        }
    }
}

/// Map buffer errors to `HttpError`
///
/// If the inner service returned an `HttpError`, it is passed through.
/// Otherwise the buffer worker is gone and `ServiceClosed` is returned.
pub(crate) fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}
