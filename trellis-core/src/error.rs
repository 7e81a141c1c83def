//! The HTTP-facing error model.
//!
//! Every kind maps to a stable status; bodies are
//! `{ "detail": ..., "correlation_id": ... }` with the correlation ID
//! filled in by the [`correlation`](crate::request_id::correlation)
//! middleware.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

#[derive(Debug, Clone)]
pub enum Error {
    /// Unknown path, or a node the caller cannot read (indistinguishable
    /// by design).
    NotFound(String),
    /// Missing, malformed, expired, or revoked credentials.
    Unauthorized(String),
    /// Authenticated but lacking the required scope on this node.
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    /// Semantic rule violation (too many specs, non-unique specs, ...).
    Unprocessable(String),
    /// No encoder for any requested media type.
    NotAcceptable {
        message: String,
        supported: Vec<String>,
    },
    RangeNotSatisfiable(String),
    /// Operation unsupported by this adapter.
    MethodNotAllowed(String),
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            Error::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Error::NotFound(msg)
            | Error::Unauthorized(msg)
            | Error::Forbidden(msg)
            | Error::BadRequest(msg)
            | Error::Conflict(msg)
            | Error::Unprocessable(msg)
            | Error::RangeNotSatisfiable(msg)
            | Error::MethodNotAllowed(msg)
            | Error::Internal(msg) => msg,
            Error::NotAcceptable { message, .. } => message,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status(), self.detail())
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Internal details are logged, not leaked.
        if let Error::Internal(detail) = &self {
            tracing::error!(%detail, "internal server error");
        }
        let detail = match &self {
            Error::Internal(_) => "internal server error".to_string(),
            other => other.detail().to_string(),
        };
        let mut body = serde_json::json!({ "detail": detail });
        if let Error::NotAcceptable { supported, .. } = &self {
            body["supported_formats"] = serde_json::json!(supported);
        }
        (self.status(), Json(body)).into_response()
    }
}

impl From<trellis_adapters::AdapterError> for Error {
    fn from(err: trellis_adapters::AdapterError) -> Self {
        use trellis_adapters::AdapterError;
        match err {
            AdapterError::NotFound(msg) => Error::NotFound(msg),
            AdapterError::MethodNotAllowed(msg) => Error::MethodNotAllowed(msg),
            AdapterError::BadRequest(msg) => Error::BadRequest(msg),
            AdapterError::Conflict(msg) => Error::Conflict(msg),
            AdapterError::Internal(msg) => Error::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: Error) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn statuses_and_bodies() {
        let (status, body) = error_parts(Error::NotFound("no such entry: a/b".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "no such entry: a/b");

        let (status, _) = error_parts(Error::Conflict("duplicate".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = error_parts(Error::NotAcceptable {
            message: "no encoder".into(),
            supported: vec!["application/json".into()],
        })
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(body["supported_formats"][0], "application/json");
    }

    #[tokio::test]
    async fn internal_details_not_leaked() {
        let (status, body) = error_parts(Error::Internal("secret path /etc".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "internal server error");
    }
}
