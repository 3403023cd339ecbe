//! Socket wire messages
//!
//! Every frame is a JSON object `{type, data, timestamp}` where `type` is
//! one of `LOCATION_UPDATE`, `PING` or `PONG` and `timestamp` is Unix
//! epoch milliseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::tracking::unix_millis;

const LOCATION_UPDATE: &str = "LOCATION_UPDATE";
const PING: &str = "PING";
const PONG: &str = "PONG";

/// Position report of one agent, shared by the socket and REST channels
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub agent_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    /// km/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Epoch milliseconds of the fix
    pub timestamp: i64,
}

/// Message sent to the backend
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    LocationUpdate { update: LocationUpdate, timestamp: i64 },
    Ping { data: Value, timestamp: i64 },
    Pong { data: Value, timestamp: i64 },
}

/// Message received from the backend
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Ping(Value),
    Pong(Value),
    Other { kind: String, data: Value },
}

#[derive(Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: i64,
}

fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

impl OutboundMessage {
    pub fn location(update: LocationUpdate) -> Self {
        Self::LocationUpdate {
            update,
            timestamp: now_millis(),
        }
    }

    pub fn ping() -> Self {
        Self::Ping {
            data: Value::Null,
            timestamp: now_millis(),
        }
    }

    /// Reply to a peer ping, echoing its payload
    pub fn pong(data: Value) -> Self {
        Self::Pong {
            data,
            timestamp: now_millis(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocationUpdate { .. } => LOCATION_UPDATE,
            Self::Ping { .. } => PING,
            Self::Pong { .. } => PONG,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let frame = match self {
            Self::LocationUpdate { update, timestamp } => Frame {
                kind: LOCATION_UPDATE.to_string(),
                data: serde_json::to_value(update)?,
                timestamp: *timestamp,
            },
            Self::Ping { data, timestamp } => Frame {
                kind: PING.to_string(),
                data: data.clone(),
                timestamp: *timestamp,
            },
            Self::Pong { data, timestamp } => Frame {
                kind: PONG.to_string(),
                data: data.clone(),
                timestamp: *timestamp,
            },
        };

        serde_json::to_string(&frame)
    }
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let frame: Frame = serde_json::from_str(text)?;

        Ok(match frame.kind.as_str() {
            PING => Self::Ping(frame.data),
            PONG => Self::Pong(frame.data),
            _ => Self::Other {
                kind: frame.kind,
                data: frame.data,
            },
        })
    }
}
