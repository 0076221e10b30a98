//! Read-only access to the persisted state.
//!
//! The response body is the stored document itself, byte for byte: an array
//! of records in append mode, a single record in replace mode.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use super::AppState;
use crate::persistence::{RecordStore, StoreError};
use crate::types::StoreState;

/// Errors that can occur when fetching state.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Nothing has been ingested yet.
    #[error("No data")]
    NotFound,

    /// A state file exists but cannot be parsed.
    #[error("{0}")]
    Corrupt(#[source] StoreError),

    /// The state file could not be read.
    #[error("{0}")]
    Unavailable(#[source] StoreError),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => QueryError::NotFound,
            e @ StoreError::Corrupt { .. } => QueryError::Corrupt(e),
            e => QueryError::Unavailable(e),
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::NotFound => StatusCode::NOT_FOUND,
            QueryError::Corrupt(_) | QueryError::Unavailable(_) => {
                warn!(error = %self, "State query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Returns the current persisted state.
///
/// Runs the read on the blocking pool so a slow disk never stalls the
/// request-handling threads.
pub async fn get_current_state(store: &RecordStore) -> Result<StoreState, QueryError> {
    Ok(store.read_all_async().await?)
}

/// Data handler.
///
/// # Response
///
/// - 200 OK with the stored JSON document, unmodified
/// - 404 Not Found with `{"error": "No data"}` before the first message
/// - 500 Internal Server Error with `{"error": "..."}` if the file is unreadable
///
/// # Example
///
/// ```ignore
/// GET /data HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// [{"topic": "bike/lock", "payload": {"locked": true}}]
/// ```
pub async fn data_handler(State(app_state): State<AppState>) -> Result<Response, QueryError> {
    let document = app_state.store().read_raw_async().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], document).into_response())
}
