//! `/metrics`, `/healthz`, and the request logging/timing middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use trellis_core::metrics::{observe_request, render};
use trellis_core::{Error, StageTimer};
use trellis_security::scopes;

use crate::extract::{Auth, AuthLog};
use crate::AppState;

/// Prometheus text exposition. Guarded by the `metrics` scope.
pub async fn metrics(auth: Auth, State(_state): State<AppState>) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::METRICS])?;
    Ok((
        [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render(),
    )
        .into_response())
}

/// Liveness probe. Unauthenticated.
pub async fn healthz() -> Response {
    axum::Json(serde_json::json!({"status": "ok"})).into_response()
}

/// Attach a stage timer, record request metrics, and emit a structured
/// log line with the correlation ID, principal, and scopes used.
///
/// The principal is resolved later, inside the handler's `Auth`
/// extractor, so this middleware plants an [`AuthLog`] slot for the
/// extractor to fill and reads it back once the response is ready.
pub async fn timing(mut request: Request, next: Next) -> Response {
    let timer = Arc::new(StageTimer::new());
    request.extensions_mut().insert(timer.clone());
    let auth_log = AuthLog::default();
    request.extensions_mut().insert(auth_log.clone());
    let method = request.method().to_string();
    let route = normalize_route(request.uri().path());
    let correlation_id = request
        .extensions()
        .get::<trellis_core::RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = started.elapsed();

    observe_request(&method, &route, response.status().as_u16(), elapsed);
    let server_timing = timer.server_timing_header();
    if !server_timing.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&server_timing) {
            response.headers_mut().insert("server-timing", value);
        }
    }
    let (principal, scopes) = auth_log.principal_and_scopes();
    tracing::info!(
        %method,
        route = %route,
        status = response.status().as_u16(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        principal = %principal,
        scopes = %scopes,
        correlation_id = %correlation_id,
        "request"
    );
    response
}

/// Collapse the path segment after a route prefix so metrics labels
/// stay low-cardinality.
fn normalize_route(path: &str) -> String {
    const PREFIXES: &[&str] = &[
        "/metadata",
        "/register",
        "/search",
        "/distinct",
        "/container/full",
        "/array/full",
        "/array/block",
        "/table/full",
        "/table/partition",
        "/awkward/full",
        "/awkward/buffers",
        "/sparse/full",
        "/sparse/block",
        "/node/full",
        "/revisions",
        "/asset/bytes",
        "/asset/manifest",
        "/stream/single",
        "/stream/close",
    ];
    for prefix in PREFIXES {
        if path == *prefix || path.starts_with(&format!("{prefix}/")) {
            return format!("{prefix}/{{path}}");
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_normalization_bounds_cardinality() {
        assert_eq!(
            normalize_route("/metadata/a/b/c"),
            "/metadata/{path}"
        );
        assert_eq!(
            normalize_route("/array/block/x"),
            "/array/block/{path}"
        );
        assert_eq!(normalize_route("/healthz"), "/healthz");
    }
}
