//! Lifecycle of the ingestion task.
//!
//! The supervisor runs the broker session and the pipeline together in one
//! spawned tokio task, separate from the HTTP server's tasks. If that task
//! panics or fails, its publish client is withdrawn and it is started again
//! with the same configuration after a backoff delay. A task that ran for longer than the backoff cap counts as
//! healthy, so the next failure starts the delay schedule over.
//!
//! # Shutdown
//!
//! Cancelling the shutdown token stops the session, which drops its channel
//! sender; the pipeline then drains whatever is already queued before the
//! task completes.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::pipeline::Pipeline;
use crate::bus::{Backoff, BusConfig, PublishSlot, SessionError, run_session};
use crate::persistence::RecordStore;

/// Default capacity of the session-to-pipeline channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Owns the broker session and restarts it when it dies.
#[derive(Debug)]
pub struct Supervisor {
    bus: Arc<BusConfig>,
    store: RecordStore,
    publish: Arc<PublishSlot>,
    channel_capacity: usize,
    record_timestamps: bool,
}

impl Supervisor {
    pub fn new(bus: BusConfig, store: RecordStore, publish: PublishSlot) -> Self {
        Supervisor {
            bus: Arc::new(bus),
            store,
            publish: Arc::new(publish),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            record_timestamps: false,
        }
    }

    /// Sets the number of deliveries buffered between session and pipeline.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Stamps each record with its ingestion time.
    pub fn with_record_timestamps(mut self, enabled: bool) -> Self {
        self.record_timestamps = enabled;
        self
    }

    /// Starts supervising on a new task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<u32> {
        tokio::spawn(self.run(shutdown))
    }

    /// Supervises until shutdown. Returns the number of restarts performed.
    pub async fn run(self, shutdown: CancellationToken) -> u32 {
        let Supervisor {
            bus,
            store,
            publish,
            channel_capacity,
            record_timestamps,
        } = self;
        let backoff = bus.backoff;

        supervise(backoff, shutdown, move |token| {
            let bus = Arc::clone(&bus);
            let publish = Arc::clone(&publish);
            let pipeline = Pipeline::new(store.clone(), record_timestamps);
            async move {
                let _session = publish.clear_on_drop();
                ingest(&bus, &publish, pipeline, channel_capacity, token).await
            }
        })
        .await
    }
}

/// Runs one session and its pipeline to completion.
async fn ingest(
    bus: &BusConfig,
    publish: &PublishSlot,
    pipeline: Pipeline,
    channel_capacity: usize,
    shutdown: CancellationToken,
) -> Result<(), SessionError> {
    let (tx, rx) = mpsc::channel(channel_capacity);
    let (session, stats) = tokio::join!(
        run_session(bus, tx, publish, shutdown),
        pipeline.run(rx)
    );
    if stats.failed > 0 {
        warn!(
            ingested = stats.ingested,
            failed = stats.failed,
            "Session ended with messages that could not be persisted"
        );
    }
    session
}

/// Runs tasks produced by `start` until `shutdown` is cancelled, restarting
/// them with backoff whenever they panic, fail, or exit on their own.
///
/// Each task receives a child of `shutdown`. Returns the number of restarts.
pub async fn supervise<F, Fut, E>(
    backoff: Backoff,
    shutdown: CancellationToken,
    mut start: F,
) -> u32
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut retry = backoff.start();
    let mut restarts = 0u32;

    loop {
        let started = Instant::now();
        let task = tokio::spawn(start(shutdown.child_token()));

        match task.await {
            Ok(Ok(())) if shutdown.is_cancelled() => {
                info!(restarts, "Ingestion task stopped");
                return restarts;
            }
            Ok(Ok(())) => warn!("Ingestion task exited unexpectedly"),
            Ok(Err(e)) => error!(error = %e, "Ingestion task failed"),
            Err(e) if e.is_panic() => error!("Ingestion task panicked"),
            Err(e) => error!(error = %e, "Ingestion task aborted"),
        }

        if shutdown.is_cancelled() {
            return restarts;
        }
        if started.elapsed() >= backoff.max_delay {
            retry.reset();
        }

        let delay = retry.next_delay();
        restarts += 1;
        info!(
            restarts,
            delay_secs = delay.as_secs_f64(),
            "Restarting ingestion task"
        );
        tokio::select! {
            _ = shutdown.cancelled() => return restarts,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
