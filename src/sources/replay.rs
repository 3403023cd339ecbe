//! Recorded track playback

use std::time::Duration;

use geo::geometry::Point;
use geo::HaversineDistance;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    AcquisitionError, AcquisitionRequest, AuthorizationState, PositionSource, PositionStreams,
    SourceEvent, StreamSenders,
};
use crate::PositionSample;

/// One recorded fix, positioned relative to the start of the recording
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayPoint {
    pub coordinates: Point,
    pub offset: Duration,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

impl ReplayPoint {
    pub fn basic(coordinates: Point, offset: Duration) -> Self {
        Self {
            coordinates,
            offset,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }
}

/// Plays recorded points back at their recorded pace
///
/// Each delivered sample is stamped with the current time, so the
/// staleness filter treats the playback as live.
pub struct ReplaySource {
    points: Vec<ReplayPoint>,
    /// Playback speed multiplier
    pace: f64,
    running: Option<CancellationToken>,
    finished: CancellationToken,
}

impl ReplaySource {
    pub fn new(mut points: Vec<ReplayPoint>) -> Self {
        points.sort_by_key(|p| p.offset);

        Self {
            points,
            pace: 1.0,
            running: None,
            finished: CancellationToken::new(),
        }
    }

    pub fn pace(&mut self, pace: f64) -> &mut Self {
        self.pace = if pace > 0.0 { pace } else { 1.0 };

        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cancelled once every point of the current playback has been played.
    /// Each playback started after a finished one gets a fresh token.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }
}

impl PositionSource for ReplaySource {
    fn start(&mut self, request: &AcquisitionRequest) -> Result<PositionStreams, AcquisitionError> {
        if self.running.is_some() {
            return Err(AcquisitionError::Platform("replay already running".to_string()));
        }
        if self.points.is_empty() {
            return Err(AcquisitionError::PositionUnavailable);
        }

        if self.finished.is_cancelled() {
            self.finished = CancellationToken::new();
        }

        let (senders, streams) = PositionStreams::channel();
        let cancel = CancellationToken::new();
        self.running = Some(cancel.clone());

        info!(points = self.points.len(), pace = self.pace, "Replay started");
        tokio::spawn(play(
            self.points.clone(),
            request.clone(),
            self.pace,
            senders,
            cancel,
            self.finished.clone(),
        ));

        Ok(streams)
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.running.take() {
            cancel.cancel();
        }
    }
}

async fn play(
    points: Vec<ReplayPoint>,
    request: AcquisitionRequest,
    pace: f64,
    senders: StreamSenders,
    cancel: CancellationToken,
    finished: CancellationToken,
) {
    let _ = senders
        .events
        .send(SourceEvent::Authorization(AuthorizationState::Always))
        .await;

    let started = tokio::time::Instant::now();
    let mut last_sent: Option<Point> = None;
    let mut delivered = 0usize;

    for point in points {
        let due = started + point.offset.div_f64(pace);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(delivered, "Replay stopped");
                return;
            }
            _ = tokio::time::sleep_until(due) => {}
        }

        if let Some(last) = last_sent {
            if last.haversine_distance(&point.coordinates) < request.min_distance_m {
                continue;
            }
        }

        let sample = PositionSample {
            coordinates: point.coordinates,
            time: OffsetDateTime::now_utc(),
            accuracy: point
                .accuracy
                .unwrap_or_else(|| request.desired_accuracy.meters()),
            speed: point.speed,
            heading: point.heading,
        };

        if senders.samples.send(sample).await.is_err() {
            break;
        }
        last_sent = Some(point.coordinates);
        delivered += 1;
    }

    debug!(delivered, "Replay finished");
    finished.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DesiredAccuracy;

    fn points() -> Vec<ReplayPoint> {
        vec![
            ReplayPoint::basic(Point::new(126.9780, 37.5665), Duration::from_secs(0)),
            // ~3 m, below the minimum distance
            ReplayPoint::basic(Point::new(126.9780, 37.56653), Duration::from_secs(1)),
            ReplayPoint::basic(Point::new(126.9780, 37.5667), Duration::from_secs(2)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn plays_points_honoring_min_distance() -> Result<(), String> {
        let mut source = ReplaySource::new(points());
        let finished = source.finished();
        let mut streams = source
            .start(&AcquisitionRequest::default())
            .map_err(|e| e.to_string())?;

        finished.cancelled().await;

        let first = streams.samples.recv().await.ok_or("first sample")?;
        let second = streams.samples.recv().await.ok_or("second sample")?;
        assert_eq!(37.5665, first.latitude());
        assert_eq!(37.5667, second.latitude());
        assert_eq!(DesiredAccuracy::Best.meters(), first.accuracy);
        assert!(streams.samples.recv().await.is_none());

        assert_eq!(
            Some(SourceEvent::Authorization(AuthorizationState::Always)),
            streams.events.recv().await
        );

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_playback() -> Result<(), String> {
        let mut source = ReplaySource::new(points());
        let mut streams = source
            .start(&AcquisitionRequest::default())
            .map_err(|e| e.to_string())?;

        let first = streams.samples.recv().await;
        assert!(first.is_some());

        source.stop();
        assert!(streams.samples.recv().await.is_none());
        assert!(!source.finished().is_cancelled());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn replay_again_after_finishing() -> Result<(), String> {
        let mut source = ReplaySource::new(points());
        let request = AcquisitionRequest::default();

        let first_run = source.finished();
        let _streams = source.start(&request).map_err(|e| e.to_string())?;
        first_run.cancelled().await;
        source.stop();

        let mut streams = source.start(&request).map_err(|e| e.to_string())?;
        let second_run = source.finished();
        assert!(first_run.is_cancelled());
        assert!(!second_run.is_cancelled());

        second_run.cancelled().await;
        let mut delivered = 0;
        while streams.samples.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(2, delivered);

        Ok(())
    }

    #[test]
    fn empty_recording_is_unavailable() {
        let mut source = ReplaySource::new(vec![]);

        let result = source.start(&AcquisitionRequest::default());
        assert_eq!(Some(AcquisitionError::PositionUnavailable), result.err());
    }
}
