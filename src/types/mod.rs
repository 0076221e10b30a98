//! Core domain types for the telemetry ingester.
//!
//! A [`Record`] is one decoded broker message. The persisted document is a
//! [`StoreState`], whose shape depends on the configured [`StoreMode`].

pub mod record;

pub use record::{InvalidStoreMode, Record, StoreMode, StoreState};
