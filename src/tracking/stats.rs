//! Session statistics aggregate

use time::OffsetDateTime;

use crate::PositionSample;

/// Running statistics of one tracking run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStats {
    /// Accepted samples of this run, in acceptance order
    pub samples: Vec<PositionSample>,
    pub total_distance_m: f64,
    pub current_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub rejected: usize,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    speed_sum: f64,
    speed_count: usize,
}

impl SessionStats {
    pub fn started(at: OffsetDateTime) -> Self {
        Self {
            started_at: Some(at),
            ..Default::default()
        }
    }

    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    /// Fold in an accepted sample with its filter-derived delta and speed
    pub fn record(&mut self, sample: PositionSample, delta_m: f64, speed_kmh: Option<f64>) {
        self.total_distance_m += delta_m;

        let speed = speed_kmh.unwrap_or(0.0);
        self.current_speed_kmh = speed;
        if speed > 0.0 {
            self.speed_sum += speed;
            self.speed_count += 1;
        }
        if speed > self.max_speed_kmh {
            self.max_speed_kmh = speed;
        }

        self.samples.push(sample);
    }

    pub fn reject(&mut self) {
        self.rejected += 1;
    }

    /// Mean of the positive speeds seen this run
    pub fn average_speed_kmh(&self) -> f64 {
        if self.speed_count == 0 {
            0.0
        } else {
            self.speed_sum / self.speed_count as f64
        }
    }

    pub fn duration(&self, now: OffsetDateTime) -> time::Duration {
        match self.started_at {
            Some(start) => self.ended_at.unwrap_or(now) - start,
            None => time::Duration::ZERO,
        }
    }

    /// Forget distance, speeds and history, keeping the run open
    pub fn reset(&mut self) {
        let started_at = self.started_at;
        *self = Self {
            started_at,
            ..Default::default()
        };
    }
}
