//! Diagnostic publishing through the running broker session.
//!
//! The broker client belongs to the session task. Other parts of the process
//! only get a [`PublishHandle`], which can enqueue a JSON message on the
//! configured publish topic and nothing else. The session installs its client
//! into the paired [`PublishSlot`] when it starts and clears it when it stops,
//! so the handle always targets the live session, including after a restart.

use std::sync::Arc;

use rumqttc::{AsyncClient, ClientError, QoS};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Errors that can occur when publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    /// No publish topic is configured.
    #[error("publishing is disabled: no publish topic configured")]
    Disabled,

    /// No broker session is currently running.
    #[error("no broker session is running")]
    NoSession,

    /// The client's request queue rejected the message.
    #[error("broker client rejected publish: {0}")]
    Client(#[from] ClientError),

    /// The payload could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Creates a connected slot/handle pair for the given publish topic.
pub fn publish_channel(topic: Option<String>) -> (PublishSlot, PublishHandle) {
    let (tx, rx) = watch::channel(None);
    let slot = PublishSlot { tx };
    let handle = PublishHandle {
        topic: topic.map(Arc::from),
        client: rx,
    };
    (slot, handle)
}

/// Session-side half: owns the right to install and clear the live client.
#[derive(Debug)]
pub struct PublishSlot {
    tx: watch::Sender<Option<AsyncClient>>,
}

impl PublishSlot {
    /// Makes `client` available to publish handles.
    pub fn install(&self, client: AsyncClient) {
        self.tx.send_replace(Some(client));
    }

    /// Withdraws the current client; publishes fail with [`PublishError::NoSession`].
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Returns a guard that clears the slot when dropped.
    ///
    /// A task holding the guard withdraws its client however it ends,
    /// including by panicking.
    pub fn clear_on_drop(&self) -> ClearOnDrop<'_> {
        ClearOnDrop { slot: self }
    }
}

/// Clears a [`PublishSlot`] on drop. See [`PublishSlot::clear_on_drop`].
#[must_use = "the slot is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ClearOnDrop<'a> {
    slot: &'a PublishSlot,
}

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.slot.clear();
    }
}

/// Cloneable handle for enqueueing diagnostic publishes.
#[derive(Debug, Clone)]
pub struct PublishHandle {
    topic: Option<Arc<str>>,
    client: watch::Receiver<Option<AsyncClient>>,
}

impl PublishHandle {
    /// The configured publish topic, if publishing is enabled.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Returns true if a session is currently running.
    pub fn has_session(&self) -> bool {
        self.client.borrow().is_some()
    }

    /// Enqueues `payload` on the publish topic at QoS 1.
    ///
    /// Never waits on the session: if the client's request queue is full the
    /// publish is rejected immediately. The broker's PUBACK is logged by the
    /// session when it arrives.
    pub fn publish_json(&self, payload: &Value) -> Result<(), PublishError> {
        let topic = self.topic().ok_or(PublishError::Disabled)?;
        let client = self.client.borrow().clone().ok_or(PublishError::NoSession)?;

        let bytes = serde_json::to_vec(payload)?;
        client.try_publish(topic, QoS::AtLeastOnce, false, bytes)?;
        debug!(topic, "Queued diagnostic publish");
        Ok(())
    }
}
