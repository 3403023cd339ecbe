//! Tracking session coordinator

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::filter::{SampleFilter, Verdict};
use super::publisher::{FallbackTimer, TelemetryPublisher};
use super::stats::SessionStats;
use crate::config::TrackingConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::gateway::{BackgroundExecution, NoBackground, OrderLocationGateway};
use crate::sources::{
    AcquisitionError, AcquisitionRequest, AuthorizationState, PositionSource, SourceEvent,
};
use crate::PositionSample;

/// Session level error shown to the user
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("Telemetry connection failed: {0}")]
    Transport(String),
}

/// What observers see of the session
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub is_active: bool,
    pub current_position: Option<PositionSample>,
    pub total_distance_m: f64,
    pub current_speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub accepted_samples: usize,
    pub rejected_samples: usize,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub last_error: Option<SessionError>,
}

impl SessionSnapshot {
    fn new(is_active: bool, stats: &SessionStats, last_error: Option<SessionError>) -> Self {
        Self {
            is_active,
            current_position: stats.last_sample().cloned(),
            total_distance_m: stats.total_distance_m,
            current_speed_kmh: stats.current_speed_kmh,
            average_speed_kmh: stats.average_speed_kmh(),
            max_speed_kmh: stats.max_speed_kmh,
            accepted_samples: stats.samples.len(),
            rejected_samples: stats.rejected,
            started_at: stats.started_at,
            ended_at: stats.ended_at,
            last_error,
        }
    }
}

/// Holds background execution while a run is active
struct BackgroundLease(Arc<dyn BackgroundExecution>);

impl BackgroundLease {
    fn acquire(executor: Arc<dyn BackgroundExecution>) -> Self {
        executor.begin();
        Self(executor)
    }
}

impl Drop for BackgroundLease {
    fn drop(&mut self) {
        self.0.end();
    }
}

enum PumpCommand {
    Reset,
}

struct ActiveRun {
    cancel: CancellationToken,
    pump: JoinHandle<SessionStats>,
    commands: mpsc::UnboundedSender<PumpCommand>,
    fallback: FallbackTimer,
    lease: BackgroundLease,
}

/// Starts and stops acquisition and the telemetry connection together,
/// and aggregates the statistics of the current run
pub struct TrackingSession<S, G> {
    source: S,
    connection: ConnectionManager,
    publisher: TelemetryPublisher<G>,
    filter: SampleFilter,
    acquisition: AcquisitionRequest,
    background: Arc<dyn BackgroundExecution>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    run: Option<ActiveRun>,
}

impl<S, G> TrackingSession<S, G>
where
    S: PositionSource,
    G: OrderLocationGateway,
{
    pub fn new(
        source: S,
        connection: ConnectionManager,
        gateway: Arc<G>,
        config: &TrackingConfig,
    ) -> Self {
        let publisher =
            TelemetryPublisher::new(config.publisher.clone(), connection.handle(), gateway);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        Self {
            source,
            connection,
            publisher,
            filter: SampleFilter::new(config.filter.clone()),
            acquisition: config.acquisition.clone(),
            background: Arc::new(NoBackground),
            snapshot: Arc::new(snapshot),
            run: None,
        }
    }

    pub fn background(&mut self, executor: Arc<dyn BackgroundExecution>) -> &mut Self {
        self.background = executor;

        self
    }

    pub fn is_active(&self) -> bool {
        self.run.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn publisher(&self) -> &TelemetryPublisher<G> {
        &self.publisher
    }

    /// Begin a run. Does nothing when already active.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.run.is_some() {
            trace!("Tracking already active");
            return Ok(());
        }

        let streams = match self.source.start(&self.acquisition) {
            Ok(streams) => streams,
            Err(e) => {
                warn!(error = %e, "Position source failed to start");
                let error = SessionError::from(e);
                self.snapshot
                    .send_modify(|s| s.last_error = Some(error.clone()));
                return Err(error);
            }
        };

        let stats = SessionStats::started(OffsetDateTime::now_utc());
        self.publisher.forget();
        self.snapshot
            .send_replace(SessionSnapshot::new(true, &stats, None));

        let lease = BackgroundLease::acquire(self.background.clone());
        let connection_events = self.connection.subscribe();
        self.connection.connect();
        let fallback = self.publisher.start_fallback();

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let pump = Pump {
            filter: self.filter.clone(),
            publisher: self.publisher.clone(),
            snapshot: self.snapshot.clone(),
            stats,
            last_error: None,
            samples: Some(streams.samples),
            events: Some(streams.events),
            connection: Some(connection_events),
            commands: commands_rx,
            cancel: cancel.clone(),
        };

        self.run = Some(ActiveRun {
            cancel,
            pump: tokio::spawn(pump.run()),
            commands: commands_tx,
            fallback,
            lease,
        });
        info!(
            min_distance_m = self.acquisition.min_distance_m,
            background = self.acquisition.background,
            "Tracking session started"
        );

        Ok(())
    }

    /// End the run: stop acquisition, send the last position over the
    /// fallback channel, close the socket. Does nothing when idle.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            trace!("Tracking not active");
            return;
        };
        let ActiveRun {
            cancel,
            pump,
            commands: _,
            fallback,
            lease,
        } = run;

        self.source.stop();
        cancel.cancel();
        let stats = match pump.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Session pump ended abnormally");
                None
            }
        };
        fallback.cancel().await;

        self.publisher.send_fallback().await;
        self.connection.disconnect().await;
        drop(lease);

        let ended_at = OffsetDateTime::now_utc();
        self.snapshot.send_modify(|s| {
            s.is_active = false;
            s.ended_at = Some(ended_at);
        });

        if let Some(stats) = stats {
            info!(
                distance_m = stats.total_distance_m,
                samples = stats.samples.len(),
                rejected = stats.rejected,
                duration_secs = stats.duration(ended_at).whole_seconds(),
                "Tracking session stopped"
            );
        }
    }

    /// Clear distance, speeds and sample history without stopping
    pub fn reset(&self) {
        match &self.run {
            Some(run) => {
                let _ = run.commands.send(PumpCommand::Reset);
            }
            None => {
                self.snapshot.send_modify(|s| {
                    let mut stats = SessionStats::default();
                    stats.started_at = s.started_at;
                    stats.ended_at = s.ended_at;
                    *s = SessionSnapshot::new(false, &stats, s.last_error.clone());
                });
            }
        }
        debug!("Session statistics reset");
    }
}

impl<S, G> Drop for TrackingSession<S, G> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            // abandoned without stop(): cancel timers, no final send
            run.cancel.cancel();
        }
    }
}

/// Single writer of the run statistics
struct Pump<G> {
    filter: SampleFilter,
    publisher: TelemetryPublisher<G>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    stats: SessionStats,
    last_error: Option<SessionError>,
    samples: Option<mpsc::Receiver<PositionSample>>,
    events: Option<mpsc::Receiver<SourceEvent>>,
    connection: Option<broadcast::Receiver<ConnectionEvent>>,
    commands: mpsc::UnboundedReceiver<PumpCommand>,
    cancel: CancellationToken,
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_connection_event(
    rx: &mut Option<broadcast::Receiver<ConnectionEvent>>,
) -> Result<ConnectionEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<G: OrderLocationGateway> Pump<G> {
    async fn run(mut self) -> SessionStats {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => match command {
                    PumpCommand::Reset => {
                        self.stats.reset();
                        self.publish_snapshot();
                    }
                },
                event = recv_or_pending(&mut self.events) => match event {
                    Some(event) => self.on_source_event(event),
                    None => {
                        debug!("Position source event stream ended");
                        self.events = None;
                    }
                },
                sample = recv_or_pending(&mut self.samples) => match sample {
                    Some(sample) => self.on_sample(sample),
                    None => {
                        debug!("Position sample stream ended");
                        self.samples = None;
                    }
                },
                event = next_connection_event(&mut self.connection) => match event {
                    Ok(event) => self.on_connection_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Connection events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => self.connection = None,
                },
            }
        }

        self.stats
    }

    fn on_sample(&mut self, sample: PositionSample) {
        let now = OffsetDateTime::now_utc();

        match self.filter.accept(&sample, self.stats.last_sample(), now) {
            Verdict::Accepted { delta_m, speed_kmh } => {
                trace!(delta_m, ?speed_kmh, accuracy = sample.accuracy, "Sample accepted");
                self.publisher.publish(&sample, speed_kmh);
                self.stats.record(sample, delta_m, speed_kmh);
            }
            Verdict::Rejected(reason) => {
                trace!(%reason, accuracy = sample.accuracy, "Sample rejected");
                self.stats.reject();
            }
        }

        self.publish_snapshot();
    }

    fn on_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Authorization(state) if state.allows_updates() => {
                if self.last_error == Some(AcquisitionError::PermissionDenied.into()) {
                    self.clear_error();
                }
            }
            SourceEvent::Authorization(AuthorizationState::Denied) => {
                self.set_error(AcquisitionError::PermissionDenied.into())
            }
            SourceEvent::Authorization(state) => trace!(?state, "Authorization pending"),
            SourceEvent::Error(e) => self.set_error(e.into()),
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event.to {
            ConnectionState::Failed(reason) => self.set_error(SessionError::Transport(reason)),
            ConnectionState::Connected => {
                if matches!(self.last_error, Some(SessionError::Transport(_))) {
                    self.clear_error();
                }
            }
            _ => {}
        }
    }

    /// Errors are reported once, not again while they persist
    fn set_error(&mut self, error: SessionError) {
        if self.last_error.as_ref() == Some(&error) {
            return;
        }

        warn!(error = %error, "Tracking session error");
        self.last_error = Some(error);
        self.publish_snapshot();
    }

    fn clear_error(&mut self) {
        self.last_error = None;
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(SessionSnapshot::new(
            true,
            &self.stats,
            self.last_error.clone(),
        ));
    }
}
