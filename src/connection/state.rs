//! Connection state machine types

use std::fmt;
use std::time::Duration;

/// Lifecycle of the telemetry socket
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Reconnect attempts exhausted; only an explicit connect leaves it
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether `next` may directly follow this state
    pub fn permits(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Failed(_), Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
                | (Disconnected, Failed(_))
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Current connection status as seen by observers
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful open
    pub reconnect_attempt: u32,
    /// Delay before the scheduled reconnect, if one is pending
    pub retry_in: Option<Duration>,
}

/// A single state transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub from: ConnectionState,
    pub to: ConnectionState,
}
