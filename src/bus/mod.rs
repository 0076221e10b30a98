//! Message bus client.
//!
//! Holds the MQTT session that feeds the ingestion pipeline.
//!
//! # Module Structure
//!
//! - [`session`]: the connect/subscribe/forward loop and its event policy
//! - [`backoff`]: reconnect delay schedule
//! - [`state`]: connection state machine
//! - [`tls`]: plain, verified, and unverified transports
//! - [`publish`]: narrow handle for diagnostic publishes

pub mod backoff;
pub mod publish;
pub mod session;
pub mod state;
pub mod tls;

pub use backoff::{Backoff, Retry};
pub use publish::{ClearOnDrop, PublishError, PublishHandle, PublishSlot, publish_channel};
pub use session::{BusConfig, Delivery, SessionError, run_session};
pub use state::ConnectionState;
pub use tls::{TlsError, TransportSecurity};
