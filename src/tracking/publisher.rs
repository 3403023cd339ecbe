//! Telemetry publisher
//!
//! Every accepted sample goes straight to the socket as a
//! `LOCATION_UPDATE`. Independently, a fallback timer re-sends the last
//! accepted sample over REST so the backend keeps a fresh position
//! through socket outages.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::seconds;
use crate::connection::{ConnectionHandle, LocationUpdate, OutboundMessage};
use crate::gateway::OrderLocationGateway;
use crate::tracking::unix_millis;
use crate::PositionSample;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Identifier of the tracked agent in every report
    pub agent_id: String,
    #[serde(deserialize_with = "seconds")]
    pub fallback_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            agent_id: "unassigned".to_string(),
            fallback_interval: Duration::from_secs(10),
        }
    }
}

pub struct TelemetryPublisher<G> {
    agent_id: Arc<str>,
    connection: ConnectionHandle,
    gateway: Arc<G>,
    last: Arc<watch::Sender<Option<LocationUpdate>>>,
    fallback_interval: Duration,
}

impl<G> Clone for TelemetryPublisher<G> {
    fn clone(&self) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            connection: self.connection.clone(),
            gateway: self.gateway.clone(),
            last: self.last.clone(),
            fallback_interval: self.fallback_interval,
        }
    }
}

impl<G: OrderLocationGateway> TelemetryPublisher<G> {
    pub fn new(config: PublisherConfig, connection: ConnectionHandle, gateway: Arc<G>) -> Self {
        let (last, _) = watch::channel(None);

        Self {
            agent_id: config.agent_id.into(),
            connection,
            gateway,
            last: Arc::new(last),
            fallback_interval: config.fallback_interval,
        }
    }

    pub fn location_update(
        &self,
        sample: &PositionSample,
        speed_kmh: Option<f64>,
    ) -> LocationUpdate {
        LocationUpdate {
            agent_id: self.agent_id.to_string(),
            latitude: sample.latitude(),
            longitude: sample.longitude(),
            accuracy: sample.accuracy,
            speed: speed_kmh,
            heading: sample.heading,
            timestamp: unix_millis(sample.time),
        }
    }

    /// Hand an accepted sample to the socket. Never blocks, never fails.
    pub fn publish(&self, sample: &PositionSample, speed_kmh: Option<f64>) {
        let update = self.location_update(sample, speed_kmh);
        self.last.send_replace(Some(update.clone()));
        self.connection.send(OutboundMessage::location(update));
    }

    pub fn last_update(&self) -> Option<LocationUpdate> {
        self.last.borrow().clone()
    }

    /// Drop the remembered sample, so a new run never reports the previous one
    pub fn forget(&self) {
        self.last.send_replace(None);
    }

    /// Send the last accepted sample over REST. Failures are logged only.
    pub async fn send_fallback(&self) -> bool {
        let Some(update) = self.last_update() else {
            trace!("No accepted sample yet, fallback skipped");
            return false;
        };

        match self.gateway.update_location(&update).await {
            Ok(()) => {
                debug!(timestamp = update.timestamp, "Location fallback delivered");
                true
            }
            Err(e) => {
                warn!(error = %e, "Location fallback failed");
                false
            }
        }
    }

    /// Start the periodic REST fallback
    pub fn start_fallback(&self) -> FallbackTimer {
        let cancel = CancellationToken::new();
        let publisher = self.clone();
        let token = cancel.clone();
        let period = self.fallback_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = publisher.send_fallback() => {}
                        }
                    }
                }
            }
            trace!("Fallback timer stopped");
        });

        FallbackTimer { cancel, handle }
    }
}

/// Running fallback timer
pub struct FallbackTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FallbackTimer {
    /// Stop the timer. No fallback send starts after this returns.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for FallbackTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
