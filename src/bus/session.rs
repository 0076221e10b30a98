//! The broker session: connect, subscribe, forward deliveries.
//!
//! # Event Handling
//!
//! rumqttc reconnects on the next `poll()` after an error, so the session is a
//! single loop around the event loop. Decisions about each event are made by
//! [`SessionDriver`], which keeps the loop itself free of policy:
//!
//! - CONNACK: reset the backoff and (re)issue the subscription. Sessions are
//!   clean, so the broker forgets subscriptions on disconnect.
//! - SUBACK: the subscription is live, unless the broker refused it.
//! - PUBLISH: forward to the pipeline over the bounded channel. While the
//!   channel is full the loop stops polling, which pushes back on the broker.
//! - Error: sleep for the next backoff delay, then poll again to reconnect.
//!
//! # Shutdown
//!
//! rumqttc acknowledges a QoS 1 PUBLISH as soon as it reads it, so every
//! message the event loop has handed out, or still holds in its buffer, is
//! forwarded to the pipeline before the session ends.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeReasonCode,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::backoff::{Backoff, Retry};
use super::publish::PublishSlot;
use super::state::{ConnectionState, ConnectionTracker};
use super::tls::{TlsError, TransportSecurity};

/// Capacity of the rumqttc request queue (subscribe/publish/disconnect).
const REQUEST_CAPACITY: usize = 16;

/// How long to keep polling after shutdown so the DISCONNECT is flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be prepared.
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    /// The subscribe request could not be queued.
    #[error("failed to queue subscription: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The broker refused the subscription.
    #[error("broker rejected subscription to {0:?}")]
    SubscriptionRejected(String),

    /// The pipeline stopped receiving deliveries.
    #[error("delivery pipeline closed")]
    PipelineClosed,
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// A message received from the broker, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Delivery {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub security: TransportSecurity,
    pub client_id: String,
    pub keep_alive: Duration,

    /// Topic filter to subscribe to; may contain `+` and `#` wildcards.
    pub subscribe_topic: String,

    /// Topic for diagnostic publishes; `None` disables publishing.
    pub publish_topic: Option<String>,

    /// Reconnect and restart schedule.
    pub backoff: Backoff,
}

impl BusConfig {
    /// Creates a configuration with plain transport and default timings.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
        subscribe_topic: impl Into<String>,
    ) -> Self {
        BusConfig {
            host: host.into(),
            port,
            security: TransportSecurity::Plain,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            subscribe_topic: subscribe_topic.into(),
            publish_topic: None,
            backoff: Backoff::RECONNECT,
        }
    }

    /// Builds the rumqttc options for this configuration.
    pub fn mqtt_options(&self) -> std::result::Result<MqttOptions, TlsError> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_transport(self.security.transport()?);
        Ok(options)
    }
}

/// What the session loop should do after an event.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do; poll again.
    Continue,

    /// Queue a subscription to the configured filter.
    Subscribe,

    /// Hand a delivery to the pipeline.
    Forward(Delivery),

    /// Wait this long before polling again.
    Backoff(Duration),

    /// The session cannot continue.
    Fail(String),
}

/// Connection policy: turns broker events into [`Action`]s.
#[derive(Debug)]
pub struct SessionDriver {
    tracker: ConnectionTracker,
    retry: Retry,
    subscribe_topic: String,
}

impl SessionDriver {
    pub fn new(subscribe_topic: impl Into<String>, backoff: Backoff) -> Self {
        SessionDriver {
            tracker: ConnectionTracker::default(),
            retry: backoff.start(),
            subscribe_topic: subscribe_topic.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Called before each poll; a disconnected session is about to reconnect.
    pub fn before_poll(&mut self) {
        if self.tracker.state() == ConnectionState::Disconnected {
            self.tracker.transition(ConnectionState::Connecting);
        }
    }

    /// Decides what to do with the result of one `poll()`.
    pub fn on_event(&mut self, event: std::result::Result<Event, ConnectionError>) -> Action {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                self.tracker.transition(ConnectionState::Connected);
                self.retry.reset();
                info!(
                    session_present = ack.session_present,
                    topic = %self.subscribe_topic,
                    "Connected to broker, subscribing"
                );
                Action::Subscribe
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    self.tracker.transition(ConnectionState::Disconnected);
                    return Action::Fail(self.subscribe_topic.clone());
                }
                self.tracker.transition(ConnectionState::SubscriptionActive);
                info!(topic = %self.subscribe_topic, "Subscription active");
                Action::Continue
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = delivery_from(&publish);
                trace!(topic = %delivery.topic, len = delivery.payload.len(), "Received message");
                Action::Forward(delivery)
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(pkid = ack.pkid, "Broker acknowledged publish");
                Action::Continue
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                self.tracker.transition(ConnectionState::Disconnected);
                Action::Continue
            }
            Ok(_) => Action::Continue,
            Err(e) => {
                let was = self.tracker.state();
                self.tracker.transition(ConnectionState::Disconnected);
                let delay = self.retry.next_delay();
                warn!(
                    error = %e,
                    state = %was,
                    attempt = self.retry.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "Broker connection failed, retrying"
                );
                Action::Backoff(delay)
            }
        }
    }
}

fn delivery_from(publish: &Publish) -> Delivery {
    Delivery::new(topic_string(&publish.topic), publish.payload.to_vec())
}

/// Converts a topic name to an owned string, replacing invalid UTF-8.
fn topic_string(topic: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(topic.as_ref()).into_owned()
}

/// Runs one broker session until shutdown or a fatal error.
///
/// Deliveries are sent to `deliveries` in the order the broker delivered
/// them. The sender is dropped when this returns, which lets the pipeline
/// drain and finish.
#[instrument(skip_all, fields(broker = %format!("{}:{}", config.host, config.port)))]
pub async fn run_session(
    config: &BusConfig,
    deliveries: mpsc::Sender<Delivery>,
    publish: &PublishSlot,
    shutdown: CancellationToken,
) -> Result<()> {
    let options = config.mqtt_options()?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    publish.install(client.clone());

    let result = drive(config, &client, &mut eventloop, &deliveries, &shutdown).await;

    publish.clear();
    disconnect(&client, &mut eventloop, &deliveries).await;
    result
}

async fn drive(
    config: &BusConfig,
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    deliveries: &mpsc::Sender<Delivery>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut driver = SessionDriver::new(&config.subscribe_topic, config.backoff);
    info!(security = %config.security, "Starting broker session");

    loop {
        driver.before_poll();

        let event = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = eventloop.poll() => event,
        };

        match driver.on_event(event) {
            Action::Continue => {}
            Action::Subscribe => {
                client.try_subscribe(config.subscribe_topic.as_str(), QoS::AtLeastOnce)?;
            }
            Action::Forward(delivery) => {
                // Already acknowledged to the broker, so never dropped on shutdown.
                deliveries
                    .send(delivery)
                    .await
                    .map_err(|_| SessionError::PipelineClosed)?;
            }
            Action::Backoff(delay) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Action::Fail(topic) => return Err(SessionError::SubscriptionRejected(topic)),
        }
    }
}

/// Sends DISCONNECT and polls briefly so it reaches the broker.
///
/// Messages the event loop has already read (and acknowledged) are still
/// forwarded to the pipeline while flushing.
async fn disconnect(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    deliveries: &mpsc::Sender<Delivery>,
) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "Could not queue DISCONNECT");
    }

    let deadline = tokio::time::Instant::now() + DISCONNECT_GRACE;
    loop {
        let event = match tokio::time::timeout_at(deadline, eventloop.poll()).await {
            Ok(event) => event,
            Err(_) => {
                debug!("Disconnect not flushed before grace period");
                return;
            }
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if deliveries.send(delivery_from(&publish)).await.is_err() {
                    warn!(
                        topic = %topic_string(&publish.topic),
                        "Pipeline closed while flushing session"
                    );
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
