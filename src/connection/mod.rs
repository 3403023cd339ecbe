//! Persistent socket connection to the telemetry backend
//!
//! A [`ConnectionManager`] owns a driver task which owns the socket. The
//! driver is the only writer of the [`ConnectionState`]; everything else
//! talks to it through channels:
//!
//! - control commands (`connect`, `disconnect`) on an unbounded channel
//! - outbound messages on a bounded channel, written in arrival order
//! - status on a `watch` channel, every transition on a `broadcast` channel
//!
//! Unexpected drops are retried with exponential backoff (see
//! [`ReconnectPolicy`]); an explicit `disconnect()` never schedules a
//! reconnect. While connected the driver sends a `PING` every heartbeat
//! interval and answers peer pings with a `PONG`.

mod message;
mod policy;
mod state;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::seconds;
use crate::gateway::CredentialProvider;

pub use message::{InboundMessage, LocationUpdate, OutboundMessage};
pub use policy::{Backoff, ReconnectPolicy};
pub use state::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use transport::{
    ConnectRequest, Connector, Link, TransportError, WebSocketConnector, WebSocketLink,
};

/// Connection parameters
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Socket endpoint, also the reconnect target
    pub url: String,
    #[serde(deserialize_with = "seconds")]
    pub base_delay: Duration,
    #[serde(deserialize_with = "seconds")]
    pub max_delay: Duration,
    pub max_attempts: u32,
    #[serde(deserialize_with = "seconds")]
    pub heartbeat_interval: Duration,
    #[serde(deserialize_with = "seconds")]
    pub connect_timeout: Duration,
    /// Outbound messages buffered between `send()` and the socket write
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws/location".to_string(),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.base_delay, self.max_delay, self.max_attempts)
    }
}

enum Control {
    Connect,
    Disconnect(oneshot::Sender<()>),
}

/// Cheap, cloneable sending side of a connection
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<OutboundMessage>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Hand a message to the socket. Dropped, not queued, unless connected.
    pub fn send(&self, message: OutboundMessage) {
        if !self.status.borrow().state.is_connected() {
            debug!(kind = message.kind(), "Not connected, dropping outbound message");
            return;
        }

        if let Err(e) = self.outbound.try_send(message) {
            let kind = match &e {
                mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => {
                    m.kind()
                }
            };
            warn!(kind, "Outbound buffer unavailable, dropping message");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state.clone()
    }
}

/// Owner of the telemetry socket
pub struct ConnectionManager {
    control: mpsc::UnboundedSender<Control>,
    handle: ConnectionHandle,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Spawn the driver task. Must be called inside a Tokio runtime.
    pub fn spawn<C: Connector>(
        connector: C,
        credentials: Arc<dyn CredentialProvider>,
        config: ConnectionConfig,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (events_tx, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            connector: Arc::new(connector),
            credentials,
            policy: config.reconnect_policy(),
            config,
            control: control_rx,
            outbound: outbound_rx,
            status: status_tx,
            events: events_tx.clone(),
            shutdown: shutdown.clone(),
            state: ConnectionState::Disconnected,
        };
        tokio::spawn(driver.run());

        Self {
            control: control_tx,
            handle: ConnectionHandle {
                outbound: outbound_tx,
                status: status_rx,
            },
            events: events_tx,
            shutdown,
        }
    }

    /// Request a connection. Returns immediately; the outcome is observed
    /// through [`status`](Self::status) and [`subscribe`](Self::subscribe).
    /// From `failed` this resets the attempt counter and retries at once.
    pub fn connect(&self) {
        if self.control.send(Control::Connect).is_err() {
            warn!("Connection driver is gone, connect ignored");
        }
    }

    /// Close the connection without reconnecting. Pending reconnect and
    /// heartbeat timers are cancelled before this returns.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control.send(Control::Disconnect(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    pub fn send(&self, message: OutboundMessage) {
        self.handle.send(message)
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.handle.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.handle.status.clone()
    }

    /// Every transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// How a served link ended
enum LinkEnd {
    Lost(String),
    Requested,
    Shutdown,
}

struct Driver<C: Connector> {
    connector: Arc<C>,
    credentials: Arc<dyn CredentialProvider>,
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    control: mpsc::UnboundedReceiver<Control>,
    outbound: mpsc::Receiver<OutboundMessage>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    state: ConnectionState,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        let mut retry_at: Option<Instant> = None;

        loop {
            let due = retry_at;
            let retry = async move {
                match due {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = retry => {
                    retry_at = self.attempt().await;
                }
                control = self.control.recv() => match control {
                    None => break,
                    Some(Control::Connect) => {
                        self.policy.reset();
                        retry_at = self.attempt().await;
                    }
                    Some(Control::Disconnect(ack)) => {
                        if retry_at.take().is_some() {
                            debug!("Pending reconnect cancelled");
                        }
                        self.policy.reset();
                        self.publish(None);
                        let _ = ack.send(());
                    }
                },
                Some(message) = self.outbound.recv() => drop_outbound(&message, &self.state),
            }
        }

        debug!("Connection driver stopped");
    }

    /// One open attempt, serving the link while it lives. Returns when the
    /// next attempt is due, or `None` when nothing is scheduled.
    async fn attempt(&mut self) -> Option<Instant> {
        self.transition(ConnectionState::Connecting);

        let request = ConnectRequest {
            url: self.config.url.clone(),
            token: self.credentials.access_token(),
        };
        if request.token.is_none() {
            debug!("No access token available, connecting without credentials");
        }

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        let open = async move {
            match tokio::time::timeout(timeout, connector.open(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        };
        tokio::pin!(open);

        let opened = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                result = &mut open => break result,
                control = self.control.recv() => match control {
                    None => return None,
                    Some(Control::Connect) => trace!("Open already in progress"),
                    Some(Control::Disconnect(ack)) => {
                        debug!("Open abandoned on request");
                        self.policy.reset();
                        self.transition(ConnectionState::Disconnected);
                        let _ = ack.send(());
                        return None;
                    }
                },
                Some(message) = self.outbound.recv() => drop_outbound(&message, &self.state),
            }
        };

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(url = %self.config.url, error = %e, "Socket open failed");
                self.transition(ConnectionState::Disconnected);
                return self.schedule_retry(e.to_string());
            }
        };

        self.policy.reset();
        self.transition(ConnectionState::Connected);
        info!(url = %self.config.url, "Telemetry socket connected");

        match self.serve(link).await {
            LinkEnd::Lost(reason) => {
                warn!(reason = %reason, "Telemetry socket lost");
                self.transition(ConnectionState::Disconnected);
                self.schedule_retry(reason)
            }
            LinkEnd::Requested | LinkEnd::Shutdown => None,
        }
    }

    async fn serve(&mut self, mut link: C::Link) -> LinkEnd {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    link.close().await;
                    return LinkEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    trace!("Heartbeat");
                    if let Err(e) = write(&mut link, &OutboundMessage::ping()).await {
                        return LinkEnd::Lost(e.to_string());
                    }
                }
                control = self.control.recv() => match control {
                    None => {
                        link.close().await;
                        return LinkEnd::Shutdown;
                    }
                    Some(Control::Connect) => trace!("Already connected"),
                    Some(Control::Disconnect(ack)) => {
                        self.transition(ConnectionState::Disconnecting);
                        link.close().await;
                        self.policy.reset();
                        self.transition(ConnectionState::Disconnected);
                        info!("Telemetry socket disconnected");
                        let _ = ack.send(());
                        return LinkEnd::Requested;
                    }
                },
                Some(message) = self.outbound.recv() => {
                    if let Err(e) = write(&mut link, &message).await {
                        return LinkEnd::Lost(e.to_string());
                    }
                }
                frame = link.next_text() => match frame {
                    None => return LinkEnd::Lost("closed by peer".to_string()),
                    Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                    Some(Ok(text)) => {
                        if let Err(e) = on_inbound(&mut link, &text).await {
                            return LinkEnd::Lost(e.to_string());
                        }
                    }
                },
            }
        }
    }

    fn schedule_retry(&mut self, reason: String) -> Option<Instant> {
        match self.policy.record_failure() {
            Backoff::Retry(delay) => {
                info!(
                    attempt = self.policy.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "Reconnect scheduled"
                );
                self.publish(Some(delay));
                Some(Instant::now() + delay)
            }
            Backoff::Exhausted => {
                warn!(
                    attempts = self.policy.attempt(),
                    reason = %reason,
                    "Reconnect attempts exhausted"
                );
                self.transition(ConnectionState::Failed(reason));
                None
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.permits(&next) {
            warn!(from = %self.state, to = %next, "Illegal connection transition ignored");
            return;
        }

        let from = std::mem::replace(&mut self.state, next.clone());
        debug!(from = %from, to = %next, "Connection state changed");
        self.publish(None);
        let _ = self.events.send(ConnectionEvent { from, to: next });
    }

    fn publish(&self, retry_in: Option<Duration>) {
        self.status.send_replace(ConnectionStatus {
            state: self.state.clone(),
            reconnect_attempt: self.policy.attempt(),
            retry_in,
        });
    }
}

fn drop_outbound(message: &OutboundMessage, state: &ConnectionState) {
    debug!(kind = message.kind(), state = %state, "Not connected, dropping outbound message");
}

async fn write<L: Link>(link: &mut L, message: &OutboundMessage) -> Result<(), TransportError> {
    let text = message.encode()?;
    link.send_text(text).await
}

async fn on_inbound<L: Link>(link: &mut L, text: &str) -> Result<(), TransportError> {
    match InboundMessage::decode(text) {
        Ok(InboundMessage::Ping(data)) => write(link, &OutboundMessage::pong(data)).await,
        Ok(InboundMessage::Pong(_)) => {
            trace!("Pong received");
            Ok(())
        }
        Ok(InboundMessage::Other { kind, .. }) => {
            debug!(kind = %kind, "Unhandled inbound message");
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, "Undecodable inbound frame ignored");
            Ok(())
        }
    }
}
