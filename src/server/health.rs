//! Liveness endpoint.
//!
//! Reports whether the HTTP server is accepting connections. The broker
//! session has no bearing on the result: the stored data stays queryable
//! while the ingestion task is reconnecting.

use axum::http::StatusCode;

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
