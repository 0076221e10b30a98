//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment variable named in its
//! `env` attribute. [`Cli::into_settings`] validates the parsed values and
//! splits them into the typed configuration each component takes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::bus::{Backoff, BusConfig, TransportSecurity};
use crate::persistence::StoreConfig;
use crate::types::StoreMode;
use crate::worker::DEFAULT_CHANNEL_CAPACITY;

/// Shortest keep-alive accepted; rumqttc rejects anything under one second.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Errors that can occur when validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("subscribe topic must not be empty")]
    EmptySubscribeTopic,

    #[error("publish topic must not be empty when set")]
    EmptyPublishTopic,

    #[error("publish topic {0:?} must not contain wildcards")]
    WildcardPublishTopic(String),

    #[error("channel capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("keep-alive must be at least {MIN_KEEP_ALIVE_SECS}s, got {0}s")]
    KeepAliveTooShort(u64),

    #[error("broker host must not be empty")]
    EmptyBrokerHost,

    #[error("client id must not be empty or start with a space")]
    InvalidClientId,
}

/// CLI entry point
#[derive(Parser, Debug, Clone)]
#[command(name = "telemetry-ingest")]
#[command(about = "Subscribes to an MQTT topic and serves the received messages over HTTP")]
pub struct Cli {
    /// Broker hostname
    #[arg(long, env = "BROKER_HOST", default_value = "broker.emqx.io")]
    pub broker_host: String,

    /// Broker port
    #[arg(long, env = "BROKER_PORT", default_value_t = 1883)]
    pub broker_port: u16,

    /// Connection security: plain, tls, or tls-insecure (demo brokers only)
    #[arg(long, env = "BROKER_TRANSPORT", default_value = "plain")]
    pub transport: TransportSecurity,

    /// MQTT client identifier (defaults to one derived from the process id)
    #[arg(long, env = "BROKER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(long, env = "BROKER_KEEP_ALIVE_SECS", default_value_t = 30)]
    pub keep_alive_secs: u64,

    /// Topic filter to subscribe to; `+` and `#` wildcards are allowed
    #[arg(long, env = "SUBSCRIBE_TOPIC", default_value = "bike/#")]
    pub subscribe_topic: String,

    /// Topic for diagnostic publishes; leave unset to disable POST /publish
    #[arg(long, env = "PUBLISH_TOPIC")]
    pub publish_topic: Option<String>,

    /// Path of the JSON state file
    #[arg(long, env = "DATA_FILE", default_value = "data.json")]
    pub data_file: PathBuf,

    /// How new records are stored: append keeps history, replace keeps the latest
    #[arg(long, env = "STORE_MODE", default_value = "append")]
    pub store_mode: StoreMode,

    /// Stamp each record with its ingestion time
    #[arg(long, env = "RECORD_TIMESTAMPS", default_value_t = false)]
    pub record_timestamps: bool,

    /// Deliveries buffered between the broker session and the store
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// HTTP listen port
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,
}

/// Validated configuration, split per component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bus: BusConfig,
    pub store: StoreConfig,
    pub listen: SocketAddr,
    pub channel_capacity: usize,
    pub record_timestamps: bool,
}

impl Cli {
    /// Validates the parsed arguments and converts them into [`Settings`].
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        if self.broker_host.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerHost);
        }
        if self.subscribe_topic.is_empty() {
            return Err(ConfigError::EmptySubscribeTopic);
        }
        if let Some(topic) = &self.publish_topic {
            if topic.is_empty() {
                return Err(ConfigError::EmptyPublishTopic);
            }
            if topic.contains(['+', '#']) {
                return Err(ConfigError::WildcardPublishTopic(topic.clone()));
            }
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::KeepAliveTooShort(self.keep_alive_secs));
        }

        let client_id = self
            .client_id
            .unwrap_or_else(|| format!("telemetry-ingest-{}", std::process::id()));
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(ConfigError::InvalidClientId);
        }

        let bus = BusConfig {
            host: self.broker_host,
            port: self.broker_port,
            security: self.transport,
            client_id,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            subscribe_topic: self.subscribe_topic,
            publish_topic: self.publish_topic,
            backoff: Backoff::RECONNECT,
        };

        Ok(Settings {
            bus,
            store: StoreConfig::new(self.data_file, self.store_mode),
            listen: SocketAddr::from(([0, 0, 0, 0], self.port)),
            channel_capacity: self.channel_capacity,
            record_timestamps: self.record_timestamps,
        })
    }
}
