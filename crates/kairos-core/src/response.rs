//! Response constructors.
//!
//! Error responses share one JSON envelope:
//! `{"error":{"code":"...","message":"..."}}`.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;

use crate::error::{ErrorCategory, HandlerError};
use crate::handler::Response;

const JSON: HeaderValue = HeaderValue::from_static("application/json");
const TEXT: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

fn with_body(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

/// Empty response with the given status.
#[must_use]
pub fn empty(status: StatusCode) -> Response {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Plain-text response.
#[must_use]
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response {
    with_body(status, TEXT, body)
}

/// JSON response from pre-serialized bytes.
#[must_use]
pub fn raw_json(status: StatusCode, body: impl Into<Bytes>) -> Response {
    with_body(status, JSON, body)
}

/// Serializes `value` as a JSON response.
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response, HandlerError> {
    let body = serde_json::to_vec(value).map_err(HandlerError::from_source)?;
    Ok(raw_json(status, body))
}

/// JSON error envelope with an explicit status and code.
#[must_use]
pub fn error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": code,
            "message": message,
        }
    });
    raw_json(status, body.to_string())
}

/// JSON error envelope for a category, using its default status.
#[must_use]
pub fn category_error(category: ErrorCategory, message: &str) -> Response {
    error(category.default_status_code(), category.code(), message)
}

/// Renders a handler error. Internal causes are not exposed.
#[must_use]
pub fn from_error(err: &HandlerError) -> Response {
    category_error(err.category(), &err.public_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = error(StatusCode::UNAUTHORIZED, "authentication", "token expired");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "authentication");
        assert_eq!(body["error"]["message"], "token expired");
    }

    #[tokio::test]
    async fn test_from_error_hides_internal_cause() {
        let err = HandlerError::from_source(std::io::Error::other("secret path /etc/x"));
        let response = from_error(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "internal");
        assert_eq!(body["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn test_json_response() {
        #[derive(Serialize)]
        struct User {
            id: u32,
        }

        let response = json(StatusCode::CREATED, &User { id: 7 }).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["id"], 7);
    }

    #[test]
    fn test_empty_and_text() {
        assert_eq!(empty(StatusCode::NO_CONTENT).status(), StatusCode::NO_CONTENT);
        let response = text(StatusCode::OK, "ok");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
