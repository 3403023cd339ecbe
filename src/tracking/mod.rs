//! Tracking pipeline: filtering, statistics, publishing and the session
//! tying them to a position source

mod filter;
mod position;
mod publisher;
mod session;
mod stats;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use filter::{FilterConfig, Rejection, SampleFilter, Verdict};
pub use position::{unix_millis, PositionSample};
pub use publisher::{FallbackTimer, PublisherConfig, TelemetryPublisher};
pub use session::{SessionError, SessionSnapshot, TrackingSession};
pub use stats::SessionStats;
