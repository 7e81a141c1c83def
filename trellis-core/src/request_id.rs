//! Correlation IDs.
//!
//! Every request gets an `x-request-id` (propagated from the client
//! when present, generated otherwise). The ID is attached to the
//! request extensions for logging, echoed as a response header, and
//! injected into JSON error bodies so users can reference it when
//! reporting issues.

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use http_body_util::BodyExt;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The request's correlation ID, readable from extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Middleware: establish the correlation ID, echo it in the response,
/// and stamp it into JSON error bodies.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(header) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }

    if response.status().is_client_error() || response.status().is_server_error() {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            return stamp_error_body(response, &id).await;
        }
    }
    response
}

/// Buffer a (small) error body and add `correlation_id`.
async fn stamp_error_body(response: Response, id: &str) -> Response {
    let (parts, body) = response.into_parts();
    let collected = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    let stamped = match serde_json::from_slice::<serde_json::Value>(&collected) {
        Ok(mut value) => {
            value["correlation_id"] = serde_json::json!(id);
            serde_json::to_vec(&value).unwrap_or_else(|_| collected.to_vec())
        }
        Err(_) => collected.to_vec(),
    };
    let mut parts = parts;
    parts.headers.remove(http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(stamped))
}
