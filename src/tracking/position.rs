//! Position definition

use geo::geometry::Point;
use geo::HaversineDistance;
use time::OffsetDateTime;

/// One position reading as delivered by a position source
#[derive(Clone, Debug, PartialEq)]
pub struct PositionSample {
    /// Longitude on `x`, latitude on `y`
    pub coordinates: Point,
    pub time: OffsetDateTime,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    /// Meters per second, when the platform reports it
    pub speed: Option<f64>,
    /// Degrees clockwise from true north
    pub heading: Option<f64>,
}

impl PositionSample {
    pub fn basic(coordinates: Point, time: OffsetDateTime, accuracy: f64) -> Self {
        Self {
            coordinates,
            time,
            accuracy,
            speed: None,
            heading: None,
        }
    }

    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);

        self
    }

    pub fn heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);

        self
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates.y()
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates.x()
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        self.coordinates.haversine_distance(&other.coordinates)
    }
}

/// Unix epoch milliseconds, the timestamp unit of the wire protocol
pub fn unix_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}
