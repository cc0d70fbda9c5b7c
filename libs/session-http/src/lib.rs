#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Session-aware HTTP request orchestration
//!
//! This crate drives browser-like request sessions against web APIs that
//! rely on cookies and CSRF tokens:
//! - Cookie store shared by every call of a session, with `csrf` cookie
//!   mirrored into a `csrf` request header
//! - Redirect following (30 per call), `http` targets upgraded to `https`
//! - Fixed-interval retries (3 per call, 2 seconds apart) with three fail
//!   modes: return the error envelope, fail at once, or retry
//! - Immediate failure on `400` responses flagged as an expired server queue
//! - A concurrency gate (2 permits) in front of the blocking entry points
//! - Typed decoding of the final response into text, envelope or JSON
//!
//! Transport is hyper over rustls with connection pooling, per-attempt
//! timeouts and transparent gzip/brotli/deflate decompression.
//!
//! # Example
//!
//! ```ignore
//! use session_http::{SessionClient, FailMode};
//!
//! let client = SessionClient::builder()
//!     .user_agent("AppleWebKit PitanguiBridge/2.2.345247.0-[HARDWARE=iPhone10_4]")
//!     .build()?;
//!
//! let devices: DeviceList = client
//!     .get("https://alexa.amazon.com/api/devices-v2/device?cached=false")
//!     .send_json()
//!     .await?;
//!
//! let reply = client
//!     .post("https://alexa.amazon.com/api/behaviors/preview")
//!     .json(&sequence)
//!     .fail_mode(FailMode::Normal)
//!     .send()
//!     .await?;
//! if !reply.status().is_success() {
//!     tracing::warn!(status = %reply.status(), "routine rejected");
//! }
//! ```

mod blocking;
mod builder;
mod client;
mod config;
mod cookie;
mod decode;
mod dispatch;
mod error;
mod gate;
mod layers;
mod request;
mod response;
pub mod serde_duration;
mod tls;

pub use blocking::{BlockingClient, BlockingRequestBuilder};
pub use builder::SessionClientBuilder;
pub use client::SessionClient;
pub use config::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_EXPIRED_HEADER,
    DEFAULT_RETRY_INTERVAL, DEFAULT_SYNC_PERMITS, DEFAULT_USER_AGENT, SessionClientConfig,
    TlsRootConfig, TransportSecurity,
};
pub use cookie::{CSRF_COOKIE, Cookie, CookieStore};
pub use decode::{Json, ResponseShape, decode_json};
pub use dispatch::{CallState, TransportService};
pub use error::{HttpError, InvalidUriKind};
pub use gate::{ConcurrencyGate, GatePermit};
pub use layers::{DefaultHeadersLayer, DefaultHeadersService};
pub use request::{Content, FailMode, RequestBuilder, RequestDescriptor};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, ResponseBody, ResponseEnvelope};
