//! courier-telemetry - real-time location telemetry for delivery agents

pub mod config;
pub mod connection;
pub mod gateway;
pub mod sources;
pub mod tracking;

pub use config::{ConfigError, TrackingConfig};
pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
    ConnectionStatus, LocationUpdate,
};
pub use gateway::{BackgroundExecution, CredentialProvider, OrderLocationGateway};
pub use sources::{AcquisitionError, AcquisitionRequest, PositionSource};
pub use tracking::{
    PositionSample, SampleFilter, SessionError, SessionSnapshot, TelemetryPublisher,
    TrackingSession,
};
