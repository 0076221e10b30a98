//! Persistence layer for ingested records.
//!
//! # File Layout
//!
//! ```text
//! <data_file>       # the complete state document (array or single record)
//! <data_file>.tmp   # transient; only exists while a write is in flight
//! ```
//!
//! # Crash Safety
//!
//! - The state file is only ever replaced by rename, never written in place
//! - Both the temp file and the containing directory are fsynced
//! - A stale `.tmp` left by a crash is ignored by readers and overwritten by
//!   the next append

pub mod atomic;
pub mod store;

pub use atomic::{fsync_dir, replace_file, temp_path};
pub use store::{RecordStore, StoreConfig, StoreError};
