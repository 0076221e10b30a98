//! Telemetry Ingest - subscribes to an MQTT topic, persists every message to a
//! JSON file, and serves the stored records over HTTP.
//!
//! This library provides the broker session, decoder, record store, and HTTP
//! layer; the binary wires them together.

pub mod bus;
pub mod config;
pub mod decode;
pub mod persistence;
pub mod server;
pub mod types;
pub mod worker;
