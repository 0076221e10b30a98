//! Ingestion worker: the pipeline and the supervisor that keeps it running.
//!
//! # Architecture
//!
//! ```text
//! broker ─▶ session ─(bounded mpsc)─▶ pipeline ─▶ decode ─▶ store
//!           └──────── one supervised tokio task ────────┘
//! ```
//!
//! - [`pipeline`]: decodes deliveries and appends them in arrival order
//! - [`supervisor`]: spawns the session + pipeline task and restarts it on failure

pub mod pipeline;
pub mod supervisor;

pub use pipeline::{Pipeline, PipelineStats};
pub use supervisor::{DEFAULT_CHANNEL_CAPACITY, Supervisor, supervise};
