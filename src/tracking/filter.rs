//! Sample validation and derivation

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::seconds;
use crate::PositionSample;

/// Filter thresholds
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples at or above this accuracy radius are rejected
    pub accuracy_threshold_m: f64,
    /// Samples at least this old are rejected
    #[serde(deserialize_with = "seconds")]
    pub staleness: Duration,
    /// A step this long between consecutive fixes is sensor noise
    pub max_plausible_jump_m: f64,
    /// A reference fix older than this is not used for jump rejection
    #[serde(deserialize_with = "seconds")]
    pub jump_reference_ttl: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold_m: 50.0,
            staleness: Duration::from_secs(5),
            max_plausible_jump_m: 100.0,
            jump_reference_ttl: Duration::from_secs(30),
        }
    }
}

/// Why a sample was discarded
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("accuracy is not a positive radius")]
    InvalidAccuracy,

    #[error("accuracy above threshold")]
    LowAccuracy,

    #[error("sample too old")]
    Stale,

    #[error("implausible jump from the previous fix")]
    ImplausibleJump,
}

/// Filter outcome
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    Accepted {
        /// Meters travelled since the previous accepted sample
        delta_m: f64,
        speed_kmh: Option<f64>,
    },
    Rejected(Rejection),
}

/// Stateless sample filter. The caller keeps the last accepted sample.
#[derive(Clone, Debug, Default)]
pub struct SampleFilter {
    config: FilterConfig,
}

impl SampleFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn accept(
        &self,
        sample: &PositionSample,
        last: Option<&PositionSample>,
        now: OffsetDateTime,
    ) -> Verdict {
        if sample.accuracy.is_nan() || sample.accuracy <= 0.0 {
            return Verdict::Rejected(Rejection::InvalidAccuracy);
        }
        if sample.accuracy >= self.config.accuracy_threshold_m {
            return Verdict::Rejected(Rejection::LowAccuracy);
        }
        if now - sample.time >= self.config.staleness {
            return Verdict::Rejected(Rejection::Stale);
        }

        let delta_m = match last {
            Some(last) if sample.time - last.time < self.config.jump_reference_ttl => {
                let delta = sample.distance_to(last);
                if delta >= self.config.max_plausible_jump_m {
                    return Verdict::Rejected(Rejection::ImplausibleJump);
                }
                delta
            }
            _ => 0.0,
        };

        Verdict::Accepted {
            delta_m,
            speed_kmh: sample.speed.map(|mps| mps.max(0.0) * 3.6),
        }
    }
}
