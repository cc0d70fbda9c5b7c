use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
///
/// # Example
///
/// ```ignore
/// match &err {
///     HttpError::InvalidUri { kind, .. } => match kind {
///         InvalidUriKind::ParseError => println!("Malformed URL syntax"),
///         InvalidUriKind::MissingAuthority => println!("URL needs a host"),
///         InvalidUriKind::MissingScheme => println!("URL needs http:// or https://"),
///         _ => println!("Other URI error"),
///     },
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Terminal outcome of a failed logical call.
///
/// Intermediate redirect and retry attempts never surface here; a caller
/// sees exactly one of these per call, after the dispatch engine has spent
/// whatever budget applies.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request body could not be serialized as JSON
    #[error("JSON encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only; do not match on its contents
    /// as the format is unstable and may change between releases.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Redirect budget exhausted while following `Location` headers
    #[error("Too many redirects (max {max}) while requesting {uri}")]
    TooManyRedirects { max: u32, uri: String },

    /// Server reported that its work queue for this request expired (400 + sentinel header)
    #[error("Server-side queue expired for {uri}")]
    QueueExpired { uri: String },

    /// Terminal non-2xx status after the retry policy gave up
    #[error("HTTP {} {reason}: {body_preview}", .status.as_u16())]
    HttpStatus {
        status: http::StatusCode,
        /// Canonical reason phrase, or `"Unknown"`
        reason: String,
        body_preview: String,
    },

    /// No response was received (status 0): transport failure, timeout, or a
    /// body that could not be read.
    #[error("Request to {uri} aborted: {source}")]
    Aborted {
        uri: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Typed decoding requested but the response carries no `Content-Type`
    #[error("Response has no Content-Type header")]
    MissingContentType,

    /// Typed decoding produced nothing and the response was not JSON
    #[error("Unexpected content type: {content_type}")]
    UnexpectedContentType { content_type: String },

    /// JSON response decoded to an empty or null value
    #[error("Response decoded to an empty result")]
    EmptyResult,

    /// Response body did not match the requested shape
    #[error("Decoding response failed: {message}")]
    DecodeFailed { message: String },

    /// Retry pause or permit wait aborted by shutdown
    #[error("Interrupted while waiting")]
    Interrupted,

    /// Single transport attempt timed out (folded into `Aborted` by the engine)
    #[error("Request attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport error (network, connection, etc), folded into `Aborted` by the engine
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// The blocking client could not start its runtime
    #[error("Failed to start blocking runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl HttpError {
    /// Whether the failure happened below HTTP, i.e. no response was received.
    ///
    /// The gated entry point retries the whole call once on these.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::QueueExpired { .. } => Some(http::StatusCode::BAD_REQUEST),
            _ => None,
        }
    }

    pub(crate) fn aborted(uri: &http::Uri, source: HttpError) -> Self {
        Self::Aborted {
            uri: uri.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_aborted_preserves_transport_source() {
        let uri: http::Uri = "https://example.com/api".parse().unwrap();
        let inner = HttpError::Transport(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        let err = HttpError::aborted(&uri, inner);

        assert!(err.is_transport());
        let source = err.source().expect("aborted error should have a source");
        let transport = source.downcast_ref::<HttpError>().unwrap();
        assert!(matches!(transport, HttpError::Transport(_)));

        // Aborted -> Transport -> io::Error
        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_status_accessor() {
        let err = HttpError::HttpStatus {
            status: http::StatusCode::INTERNAL_SERVER_ERROR,
            reason: "Internal Server Error".to_owned(),
            body_preview: String::new(),
        };
        assert_eq!(err.status(), Some(http::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!err.is_transport());

        let err = HttpError::QueueExpired {
            uri: "https://example.com".to_owned(),
        };
        assert_eq!(err.status(), Some(http::StatusCode::BAD_REQUEST));
        assert_eq!(HttpError::EmptyResult.status(), None);
    }

    #[test]
    fn test_http_status_display_includes_reason() {
        let err = HttpError::HttpStatus {
            status: http::StatusCode::FORBIDDEN,
            reason: "Forbidden".to_owned(),
            body_preview: "denied".to_owned(),
        };
        assert_eq!(err.to_string(), "HTTP 403 Forbidden: denied");
    }
}
