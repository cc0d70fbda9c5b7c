//! Typed decoding of successful responses.
//!
//! A caller picks the result shape through the type parameter of
//! [`RequestBuilder::send_as`](crate::RequestBuilder::send_as):
//!
//! - `String`: raw body text, no checks
//! - [`ResponseEnvelope`]: status, headers and body, no checks
//! - [`Json<T>`]: body decoded as JSON into `T`, content type required
//!
//! Decode failures are never retried by the dispatch engine.

use crate::error::HttpError;
use crate::response::ResponseEnvelope;
use serde::de::DeserializeOwned;

/// A shape a successful response can be converted into.
pub trait ResponseShape: Sized {
    /// Convert the final envelope of a call.
    ///
    /// # Errors
    ///
    /// Returns a decode error (`MissingContentType`, `UnexpectedContentType`,
    /// `EmptyResult` or `DecodeFailed`) when the body does not fit the shape.
    fn from_envelope(envelope: ResponseEnvelope) -> Result<Self, HttpError>;
}

impl ResponseShape for String {
    fn from_envelope(envelope: ResponseEnvelope) -> Result<Self, HttpError> {
        Ok(envelope.into_body())
    }
}

impl ResponseShape for ResponseEnvelope {
    fn from_envelope(envelope: ResponseEnvelope) -> Result<Self, HttpError> {
        Ok(envelope)
    }
}

/// JSON-decoded response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> ResponseShape for Json<T> {
    fn from_envelope(envelope: ResponseEnvelope) -> Result<Self, HttpError> {
        decode_json(&envelope).map(Json)
    }
}

/// Decode the envelope body as JSON into `T`.
///
/// A body that is blank or the literal `null` is an empty result. Whether that
/// is reported as `EmptyResult` or `UnexpectedContentType` depends on whether
/// the server declared a JSON content type.
///
/// # Errors
///
/// - `MissingContentType` if the response has no `Content-Type` header
/// - `EmptyResult` / `UnexpectedContentType` for empty bodies, see above
/// - `DecodeFailed` if the body is not valid JSON for `T`
pub fn decode_json<T: DeserializeOwned>(envelope: &ResponseEnvelope) -> Result<T, HttpError> {
    let content_type = match envelope.headers().get(http::header::CONTENT_TYPE) {
        Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
        None => return Err(HttpError::MissingContentType),
    };

    let body = envelope.body().trim();
    if body.is_empty() || body == "null" {
        return Err(if is_json_content_type(&content_type) {
            HttpError::EmptyResult
        } else {
            HttpError::UnexpectedContentType { content_type }
        });
    }

    serde_json::from_str(body).map_err(|e| HttpError::DecodeFailed {
        message: e.to_string(),
    })
}

/// `application/json` or any `+json` structured suffix, parameters ignored.
fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Device {
        serial: String,
        online: bool,
    }

    fn envelope(content_type: Option<&'static str>, body: &str) -> ResponseEnvelope {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        ResponseEnvelope::new(
            StatusCode::OK,
            headers,
            body,
            "https://example.com/api".parse().unwrap(),
        )
    }

    #[test]
    fn test_string_and_envelope_shapes_skip_checks() {
        let env = envelope(None, "<html>not json</html>");
        assert_eq!(String::from_envelope(env.clone()).unwrap(), "<html>not json</html>");
        assert_eq!(ResponseEnvelope::from_envelope(env.clone()).unwrap(), env);
    }

    #[test]
    fn test_json_shape_decodes() {
        let env = envelope(
            Some("application/json; charset=UTF-8"),
            r#"{"serial":"G090","online":true}"#,
        );
        let Json(device) = Json::<Device>::from_envelope(env).unwrap();
        assert_eq!(
            device,
            Device {
                serial: "G090".to_owned(),
                online: true
            }
        );
    }

    #[test]
    fn test_missing_content_type() {
        let result = decode_json::<Device>(&envelope(None, r#"{"serial":"x","online":true}"#));
        assert!(matches!(result, Err(HttpError::MissingContentType)));
    }

    #[test]
    fn test_empty_json_body_is_empty_result() {
        for body in ["", "   ", "null"] {
            let result = decode_json::<Device>(&envelope(Some("application/json"), body));
            assert!(matches!(result, Err(HttpError::EmptyResult)), "body {body:?}");
        }
        let result = decode_json::<Device>(&envelope(Some("application/vnd.api+json"), ""));
        assert!(matches!(result, Err(HttpError::EmptyResult)));
    }

    #[test]
    fn test_empty_non_json_body_is_unexpected_content_type() {
        let result = decode_json::<Device>(&envelope(Some("text/html"), ""));
        match result {
            Err(HttpError::UnexpectedContentType { content_type }) => {
                assert_eq!(content_type, "text/html");
            }
            other => panic!("expected UnexpectedContentType, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_is_decode_failed() {
        let result = decode_json::<Device>(&envelope(Some("application/json"), "{not json"));
        assert!(matches!(result, Err(HttpError::DecodeFailed { .. })));

        let result = decode_json::<Device>(&envelope(Some("text/html"), "<html></html>"));
        assert!(matches!(result, Err(HttpError::DecodeFailed { .. })));

        let result =
            decode_json::<Device>(&envelope(Some("application/json"), r#"{"serial":"x"}"#));
        assert!(matches!(result, Err(HttpError::DecodeFailed { message }) if message.contains("online")));
    }

    #[test]
    fn test_is_json_content_type() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type(""));
    }
}
