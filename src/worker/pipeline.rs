//! Decode-and-persist stage fed by the broker session.
//!
//! Deliveries are processed one at a time in channel order, which is the
//! order the broker delivered them. A failed write is logged and the
//! pipeline moves on to the next delivery; the store guarantees the previous
//! state is still intact.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bus::Delivery;
use crate::decode::decode;
use crate::persistence::{RecordStore, StoreError};
use crate::types::Record;

/// Counters reported when the pipeline finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Deliveries persisted successfully.
    pub ingested: u64,
    /// Deliveries whose write failed.
    pub failed: u64,
}

/// Turns deliveries into records and appends them to the store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: RecordStore,
    record_timestamps: bool,
}

impl Pipeline {
    pub fn new(store: RecordStore, record_timestamps: bool) -> Self {
        Pipeline {
            store,
            record_timestamps,
        }
    }

    /// Decodes a delivery, stamping it with the current time if enabled.
    pub fn to_record(&self, delivery: &Delivery) -> Record {
        let observed_at = self.record_timestamps.then(Utc::now);
        decode(&delivery.topic, &delivery.payload, observed_at)
    }

    /// Decodes and persists one delivery. Returns the stored record count.
    pub async fn ingest(&self, delivery: Delivery) -> Result<usize, StoreError> {
        let record = self.to_record(&delivery);
        self.store.append_async(record).await
    }

    /// Processes deliveries until every sender has been dropped.
    pub async fn run(self, mut deliveries: mpsc::Receiver<Delivery>) -> PipelineStats {
        let mut stats = PipelineStats::default();

        while let Some(delivery) = deliveries.recv().await {
            let topic = delivery.topic.clone();
            match self.ingest(delivery).await {
                Ok(count) => {
                    stats.ingested += 1;
                    debug!(topic = %topic, records = count, "Ingested message");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(topic = %topic, error = %e, "Failed to persist message");
                }
            }
        }

        info!(
            ingested = stats.ingested,
            failed = stats.failed,
            "Pipeline drained"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StoreConfig;
    use crate::types::{StoreMode, StoreState};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn store_in(dir: &TempDir) -> RecordStore {
        RecordStore::new(StoreConfig::new(
            dir.path().join("data.json"),
            StoreMode::Append,
        ))
    }

    #[tokio::test]
    async fn single_message_becomes_single_record() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let pipeline = Pipeline::new(store.clone(), false);

        pipeline
            .ingest(Delivery::new("bike/lock", br#"{"locked": true}"#.to_vec()))
            .await
            .unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            json!([{"topic": "bike/lock", "payload": {"locked": true}}])
        );
    }

    #[tokio::test]
    async fn malformed_payload_does_not_halt_ingestion() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let (tx, rx) = mpsc::channel(8);

        tx.send(Delivery::new("bike/loc", b"\xff\xfe".to_vec()))
            .await
            .unwrap();
        tx.send(Delivery::new("bike/lock", br#"{"locked": false}"#.to_vec()))
            .await
            .unwrap();
        drop(tx);

        let stats = Pipeline::new(store.clone(), false).run(rx).await;

        assert_eq!(stats, PipelineStats { ingested: 2, failed: 0 });
        let records = store.read_all().unwrap().into_records();
        assert_eq!(records[0].payload, json!({"value": "\u{FFFD}\u{FFFD}"}));
        assert_eq!(records[1].payload, json!({"locked": false}));
    }

    #[tokio::test]
    async fn deliveries_persist_in_channel_order() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let (tx, rx) = mpsc::channel(4);

        let producer = tokio::spawn(async move {
            for n in 0..25u32 {
                tx.send(Delivery::new("bike/loc", n.to_string().into_bytes()))
                    .await
                    .unwrap();
            }
        });
        let stats = Pipeline::new(store.clone(), false).run(rx).await;
        producer.await.unwrap();

        assert_eq!(stats.ingested, 25);
        let payloads: Vec<_> = store
            .read_all()
            .unwrap()
            .into_records()
            .into_iter()
            .map(|r| r.payload)
            .collect();
        let expected: Vec<_> = (0..25u32).map(|n| json!(n)).collect();
        assert_eq!(payloads, expected);
    }

    #[tokio::test]
    async fn write_failure_is_counted_and_skipped() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        // A directory at the temp path makes every write fail.
        std::fs::create_dir(crate::persistence::temp_path(store.path())).unwrap();
        let (tx, rx) = mpsc::channel(4);

        tx.send(Delivery::new("a", b"1".to_vec())).await.unwrap();
        tx.send(Delivery::new("a", b"2".to_vec())).await.unwrap();
        drop(tx);

        let stats = Pipeline::new(store.clone(), false).run(rx).await;

        assert_eq!(stats, PipelineStats { ingested: 0, failed: 2 });
        assert!(matches!(store.read_all(), Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn timestamps_are_stamped_when_enabled() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let before = Utc::now();

        Pipeline::new(store.clone(), true)
            .ingest(Delivery::new("a", b"1".to_vec()))
            .await
            .unwrap();

        let state = store.read_all().unwrap();
        let ts = state.latest().and_then(|r| r.observed_at).unwrap();
        assert!(ts >= before);
        assert!(matches!(state, StoreState::History(_)));
    }
}
