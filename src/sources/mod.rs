//! Positions sources API

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::PositionSample;

mod feed;
mod replay;

#[cfg(feature = "csv")]
mod csv_file;
#[cfg(feature = "gpx")]
mod gpx_file;

pub use feed::{ManualPositionSource, PositionFeed};
pub use replay::{ReplayPoint, ReplaySource};

#[cfg(feature = "csv")]
pub use csv_file::{read_csv_track, CsvFields};
#[cfg(feature = "gpx")]
pub use gpx_file::read_gpx_track;

/// Capacity of the sample and event channels handed out by sources
pub const STREAM_CAPACITY: usize = 64;

/// Position source
///
/// Wraps whatever produces fixes: the platform location service, a
/// recorded track, a test feed. Samples and status travel on separate
/// channels so a burst of fixes never delays an authorization change.
pub trait PositionSource: Send {
    /// Begin continuous acquisition
    fn start(&mut self, request: &AcquisitionRequest) -> Result<PositionStreams, AcquisitionError>;

    /// Halt acquisition. Calling it on a stopped source does nothing.
    fn stop(&mut self);
}

/// Receiving ends of a started source
#[derive(Debug)]
pub struct PositionStreams {
    pub samples: mpsc::Receiver<PositionSample>,
    pub events: mpsc::Receiver<SourceEvent>,
}

impl PositionStreams {
    /// Create the channel pair used by a source implementation
    pub fn channel() -> (StreamSenders, PositionStreams) {
        let (samples_tx, samples) = mpsc::channel(STREAM_CAPACITY);
        let (events_tx, events) = mpsc::channel(STREAM_CAPACITY);

        (
            StreamSenders {
                samples: samples_tx,
                events: events_tx,
            },
            PositionStreams { samples, events },
        )
    }
}

/// Sending ends kept by the source implementation
#[derive(Clone, Debug)]
pub struct StreamSenders {
    pub samples: mpsc::Sender<PositionSample>,
    pub events: mpsc::Sender<SourceEvent>,
}

/// Status notifications of a position source
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Authorization(AuthorizationState),
    Error(AcquisitionError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationState {
    NotDetermined,
    Denied,
    WhenInUse,
    Always,
}

impl AuthorizationState {
    pub fn allows_updates(self) -> bool {
        matches!(self, Self::WhenInUse | Self::Always)
    }

    pub fn allows_background(self) -> bool {
        self == Self::Always
    }
}

/// Desired accuracy hint passed to the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredAccuracy {
    Best,
    NearestTenMeters,
    HundredMeters,
}

impl DesiredAccuracy {
    /// Nominal radius in meters
    pub fn meters(self) -> f64 {
        match self {
            Self::Best => 5.0,
            Self::NearestTenMeters => 10.0,
            Self::HundredMeters => 100.0,
        }
    }
}

/// Acquisition parameters
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AcquisitionRequest {
    /// Minimum movement in meters before a new sample is delivered
    pub min_distance_m: f64,
    pub desired_accuracy: DesiredAccuracy,
    /// Keep delivering while the app is in the background
    pub background: bool,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        Self {
            min_distance_m: 10.0,
            desired_accuracy: DesiredAccuracy::Best,
            background: true,
        }
    }
}

/// Errors raised while acquiring positions
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AcquisitionError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Location platform failure: {0}")]
    Platform(String),

    /// The recorded source could not be read
    #[error("Failed on read the position source: {0}")]
    Source(String),
}
