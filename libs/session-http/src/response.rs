use crate::error::HttpError;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use http::{HeaderMap, Response, StatusCode, Uri};
use http_body_util::BodyExt;

/// Maximum body preview carried by `HttpError::HttpStatus` (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
///
/// This type can hold either a raw body or a decompressed body (gzip/br/deflate).
/// The body is type-erased to allow the decompression layer to work transparently.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Outcome of one completed attempt: status, headers and the full body text.
///
/// A logical call may produce several envelopes through redirects and
/// retries; the caller only ever sees the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    uri: Uri,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<String>, uri: Uri) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            uri,
        }
    }

    /// Drain a transport response into an envelope.
    ///
    /// The body is decoded with the `charset` declared in `Content-Type`,
    /// falling back to UTF-8 when none is declared or the label is unknown.
    /// Malformed sequences are replaced with the Unicode replacement character.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::BodyTooLarge` if the decompressed body exceeds
    /// `max_body_size`, or `HttpError::Transport` if reading fails.
    pub async fn read(
        response: Response<ResponseBody>,
        uri: Uri,
        max_body_size: usize,
    ) -> Result<Self, HttpError> {
        let (parts, body) = response.into_parts();
        let bytes = read_body_limited(body, max_body_size).await?;
        let encoding = declared_charset(&parts.headers).unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&bytes);
        Ok(Self {
            body: text.into_owned(),
            status: parts.status,
            headers: parts.headers,
            uri,
        })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// All response headers, including repeated ones such as `Set-Cookie`.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// URI of the attempt that produced this envelope (after redirects).
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn into_body(self) -> String {
        self.body
    }

    /// Body truncated to [`ERROR_BODY_PREVIEW_LIMIT`] bytes on a char boundary.
    #[must_use]
    pub fn body_preview(&self) -> String {
        if self.body.len() <= ERROR_BODY_PREVIEW_LIMIT {
            return self.body.clone();
        }
        let mut end = ERROR_BODY_PREVIEW_LIMIT;
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        self.body[..end].to_owned()
    }
}

/// Encoding named by the `charset` parameter of `Content-Type`, if recognised.
fn declared_charset(headers: &HeaderMap) -> Option<&'static Encoding> {
    let content_type = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches('"').as_bytes())
    })
}

/// Collect a response body, enforcing the byte limit on decompressed data.
///
/// This protects against decompression bombs where a small compressed
/// payload expands to gigabytes.
async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
