//! HTTP server for the telemetry ingester.
//!
//! The server only reads what the ingestion task has persisted; it never
//! talks to the broker except through the diagnostic publish handle.
//!
//! # Endpoints
//!
//! - `GET /data` - Returns the stored records as JSON
//! - `POST /publish` - Enqueues a JSON message on the publish topic (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::bus::PublishHandle;
use crate::persistence::RecordStore;

pub mod data;
pub mod health;
pub mod publish;

pub use data::{QueryError, data_handler, get_current_state};
pub use health::health_handler;
pub use publish::{PublishRequestError, publish_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Store shared with the ingestion pipeline.
    store: RecordStore,

    /// Handle onto the live broker session, if any.
    publisher: PublishHandle,
}

impl AppState {
    pub fn new(store: RecordStore, publisher: PublishHandle) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { store, publisher }),
        }
    }

    /// Returns the record store.
    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    /// Returns the publish handle.
    pub fn publisher(&self) -> &PublishHandle {
        &self.inner.publisher
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/data", get(data_handler))
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::publish_channel;
    use crate::persistence::StoreConfig;
    use crate::types::StoreMode;
    use tempfile::tempdir;

    #[test]
    fn app_state_is_clone() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(
            dir.path().join("data.json"),
            StoreMode::Append,
        ));
        let (_slot, handle) = publish_channel(Some("bike/diag".into()));

        let state = AppState::new(store, handle);
        let cloned = state.clone();

        assert_eq!(state.store().path(), cloned.store().path());
        assert_eq!(cloned.publisher().topic(), Some("bike/diag"));
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rumqttc::{AsyncClient, EventLoop, MqttOptions};
    use serde_json::{Value, json};
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    use crate::bus::{PublishSlot, publish_channel};
    use crate::persistence::StoreConfig;
    use crate::types::{Record, StoreMode};

    /// Creates a test app state backed by a temporary data file.
    fn test_app_state(
        mode: StoreMode,
        publish_topic: Option<&str>,
    ) -> (AppState, PublishSlot, TempDir) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("data.json"), mode));
        let (slot, handle) = publish_channel(publish_topic.map(str::to_string));
        (AppState::new(store, handle), slot, dir)
    }

    fn idle_client() -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("server-test", "localhost", 1883), 8)
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(app: axum::Router, uri: &str, body: &'static [u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    // ─── Health endpoint tests ───

    #[tokio::test]
    async fn health_returns_200() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);
        let app = build_router(state);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    // ─── Data endpoint tests ───

    #[tokio::test]
    async fn data_before_first_message_returns_404() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);

        let (status, body) = get(build_router(state), "/data").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "No data"}));
    }

    #[tokio::test]
    async fn data_returns_records_in_arrival_order() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);
        state
            .store()
            .append(Record::new("bike/lock", json!({"locked": true})))
            .unwrap();
        state
            .store()
            .append(Record::new("bike/loc", json!({"value": "51.5,-0.1"})))
            .unwrap();

        let (status, body) = get(build_router(state), "/data").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                {"topic": "bike/lock", "payload": {"locked": true}},
                {"topic": "bike/loc", "payload": {"value": "51.5,-0.1"}},
            ])
        );
    }

    #[tokio::test]
    async fn data_in_replace_mode_returns_single_record() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Replace, None);
        state
            .store()
            .append(Record::new("bike/lock", json!({"locked": true})))
            .unwrap();
        state
            .store()
            .append(Record::new("bike/lock", json!({"locked": false})))
            .unwrap();

        let (status, body) = get(build_router(state), "/data").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"topic": "bike/lock", "payload": {"locked": false}})
        );
    }

    #[tokio::test]
    async fn data_preserves_payload_key_order() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);
        std::fs::write(
            state.store().path(),
            br#"[{"topic":"t","payload":{"zeta":1,"alpha":2}}]"#,
        )
        .unwrap();

        let request = Request::builder().uri("/data").body(Body::empty()).unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"[{"topic":"t","payload":{"zeta":1,"alpha":2}}]"#
        );
    }

    #[tokio::test]
    async fn data_serves_externally_written_document_verbatim() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);
        let document = br#"[{"topic":"bike/loc","payload":1E2,"ts":"2024-05-01T12:00:00+02:00","qos":1}]"#;
        std::fs::write(state.store().path(), document).unwrap();

        let request = Request::builder().uri("/data").body(Body::empty()).unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], &document[..]);
    }

    #[tokio::test]
    async fn data_with_corrupt_file_returns_500() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);
        std::fs::write(state.store().path(), b"[{\"topic\":").unwrap();

        let (status, body) = get(build_router(state), "/data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    // ─── Publish endpoint tests ───

    #[tokio::test]
    async fn publish_without_topic_returns_404() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, None);

        let (status, _body) = post(build_router(state), "/publish", br#"{"ping":1}"#).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn publish_without_session_returns_503() {
        let (state, _slot, _dir) = test_app_state(StoreMode::Append, Some("bike/diag"));

        let (status, _body) = post(build_router(state), "/publish", br#"{"ping":1}"#).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn publish_invalid_json_returns_400() {
        let (state, slot, _dir) = test_app_state(StoreMode::Append, Some("bike/diag"));
        let (client, _eventloop) = idle_client();
        slot.install(client);

        let (status, _body) = post(build_router(state), "/publish", b"not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_with_session_returns_202() {
        let (state, slot, _dir) = test_app_state(StoreMode::Append, Some("bike/diag"));
        let (client, _eventloop) = idle_client();
        slot.install(client);

        let (status, body) = post(build_router(state), "/publish", br#"{"ping":1}"#).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"status": "queued", "topic": "bike/diag"}));
    }

    #[tokio::test]
    async fn publish_does_not_touch_stored_data() {
        let (state, slot, _dir) = test_app_state(StoreMode::Append, Some("bike/diag"));
        let (client, _eventloop) = idle_client();
        slot.install(client);
        let app = build_router(state.clone());

        let (status, _body) = post(app.clone(), "/publish", br#"{"ping":1}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _body) = get(app, "/data").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
