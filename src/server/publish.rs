//! Diagnostic publish endpoint.
//!
//! Accepts a JSON body and enqueues it on the configured publish topic
//! through the live broker session. The handler never waits for the broker;
//! 202 means the message was queued, not that it was acknowledged.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use super::AppState;
use crate::bus::PublishError;

/// Errors returned by the publish endpoint.
#[derive(Debug, Error)]
pub enum PublishRequestError {
    /// The request body is not valid JSON.
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// The message could not be enqueued.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl IntoResponse for PublishRequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            PublishRequestError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            PublishRequestError::Publish(PublishError::Disabled) => StatusCode::NOT_FOUND,
            PublishRequestError::Publish(PublishError::NoSession)
            | PublishRequestError::Publish(PublishError::Client(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PublishRequestError::Publish(PublishError::Json(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status != StatusCode::BAD_REQUEST {
            warn!(error = %self, "Publish request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Publish handler.
///
/// # Response
///
/// - 202 Accepted once the message is queued on the session
/// - 400 Bad Request if the body is not JSON
/// - 404 Not Found if no publish topic is configured
/// - 503 Service Unavailable if no session is running or its queue is full
pub async fn publish_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), PublishRequestError> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(PublishRequestError::InvalidBody)?;

    let publisher = app_state.publisher();
    publisher.publish_json(&payload)?;

    let topic = publisher.topic().unwrap_or_default();
    info!(topic, "Accepted diagnostic publish");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "topic": topic })),
    ))
}
