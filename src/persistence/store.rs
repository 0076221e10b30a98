//! The record store: one JSON document, one writer, many readers.
//!
//! All access goes through a single mutex owned by the store. `append` holds
//! it across the whole load-modify-write cycle and `read_all` holds it while
//! loading, so concurrent appends never lose each other's records and readers
//! never race a half-finished update.
//!
//! The store is synchronous. Async callers should use [`RecordStore::append_async`]
//! and [`RecordStore::read_all_async`], which run on the blocking pool.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::atomic::replace_file;
use crate::types::{Record, StoreMode, StoreState};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No state has been persisted yet.
    #[error("no state persisted at {}", .0.display())]
    NotFound(PathBuf),

    /// The state file exists but is not a valid state document.
    #[error("state file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking task running the operation did not complete.
    #[error("store task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Configuration for a [`RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the persisted state document.
    pub path: PathBuf,

    /// Whether records accumulate or replace each other.
    pub mode: StoreMode,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, mode: StoreMode) -> Self {
        StoreConfig {
            path: path.into(),
            mode,
        }
    }
}

/// Handle to the persisted record state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    config: StoreConfig,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Self {
        RecordStore {
            inner: Arc::new(StoreInner {
                config,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    pub fn mode(&self) -> StoreMode {
        self.inner.config.mode
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The mutex guards no data, so a poisoned lock is still usable.
        self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a record and durably rewrites the state file.
    ///
    /// A missing, empty, or corrupt state file is treated as empty prior
    /// state. Returns the number of records persisted after the write.
    #[instrument(skip(self, record), fields(topic = %record.topic, mode = %self.mode()))]
    pub fn append(&self, record: Record) -> Result<usize> {
        let _guard = self.lock();
        let path = self.path();

        let state = match self.mode() {
            StoreMode::Append => {
                let mut records = self.load_prior_records();
                records.push(record);
                StoreState::History(records)
            }
            StoreMode::Replace => StoreState::Latest(record),
        };

        let bytes = serde_json::to_vec(&state)?;
        replace_file(path, &bytes)?;

        debug!(records = state.len(), "Persisted state");
        Ok(state.len())
    }

    /// Loads the current state.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if nothing has been persisted yet
    /// - [`StoreError::Corrupt`] if the file does not parse as a state document
    pub fn read_all(&self) -> Result<StoreState> {
        let _guard = self.lock();
        load_state(self.path())
    }

    /// Runs [`append`](Self::append) on the blocking pool.
    pub async fn append_async(&self, record: Record) -> Result<usize> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.append(record))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Runs [`read_all`](Self::read_all) on the blocking pool.
    pub async fn read_all_async(&self) -> Result<StoreState> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read_all())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Returns the state file's bytes exactly as stored.
    ///
    /// The document is parsed under the lock first, so the same errors as
    /// [`read_all`](Self::read_all) apply and the bytes are always a valid
    /// state document.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        let _guard = self.lock();
        let bytes = read_bytes(self.path())?;
        parse_state(self.path(), &bytes)?;
        Ok(bytes)
    }

    /// Runs [`read_raw`](Self::read_raw) on the blocking pool.
    pub async fn read_raw_async(&self) -> Result<Vec<u8>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read_raw())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Loads existing records for an append, degrading to empty on any failure.
    ///
    /// Must be called with the lock held.
    fn load_prior_records(&self) -> Vec<Record> {
        match load_state(self.path()) {
            Ok(state) => state.into_records(),
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => {
                warn!(
                    path = %self.path().display(),
                    error = %e,
                    "Existing state unreadable, starting from empty"
                );
                Vec::new()
            }
        }
    }
}

/// Reads and parses a state document without taking the store lock.
fn load_state(path: &Path) -> Result<StoreState> {
    let bytes = read_bytes(path)?;
    parse_state(path, &bytes)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_state(path: &Path, bytes: &[u8]) -> Result<StoreState> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
