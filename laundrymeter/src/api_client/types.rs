//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients. Timestamps are RFC 3339 strings on the wire.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::machine::Sample;
use crate::user::Channel;

/// Whether the machine is running, as of the latest sample.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MachineStatus {
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
    pub running: bool,
    /// Start of the current running or idle period. Absent when the
    /// sensor could not be read.
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_changed: Option<OffsetDateTime>,
}

impl From<&Sample> for MachineStatus {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            running: sample.running,
            last_changed: sample.last_changed,
        }
    }
}

/// A full sample including the raw meter readings.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MachineDebug {
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_changed: Option<OffsetDateTime>,
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Watt-hours since the plug's counter was reset.
    pub total_energy: f64,
}

impl From<&Sample> for MachineDebug {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            running: sample.running,
            last_changed: sample.last_changed,
            voltage: sample.voltage,
            current: sample.current,
            power: sample.power,
            total_energy: sample.total_energy,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct TokenResponse {
    /// Use as `Authorization: Bearer <token>` or as a Basic username.
    pub token: String,
}

/// Users waiting for the next completion on a channel.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct Subscribers {
    pub channel: Channel,
    pub names: Vec<String>,
}

/// The caller's preference on a channel after a change.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct Subscription {
    pub channel: Channel,
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ChatRegistration {
    /// Open this link and press Start to bind the chat.
    pub link: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn status_serializes_rfc3339_and_null_last_changed() {
        let sample = Sample::sensor_failure(datetime!(2025-02-03 04:05:06.789 UTC));
        let json = serde_json::to_value(MachineStatus::from(&sample)).unwrap();

        assert_eq!(json["timestamp"], "2025-02-03T04:05:06.789Z");
        assert_eq!(json["running"], false);
        assert!(json["last_changed"].is_null());
    }

    #[test]
    fn debug_parses_back() {
        let json = r#"{
            "timestamp": "2025-02-03T04:05:06Z",
            "running": true,
            "last_changed": "2025-02-03T03:00:00Z",
            "voltage": 231.2,
            "current": 8.1,
            "power": 1870.0,
            "total_energy": 5120.5
        }"#;
        let debug: MachineDebug = serde_json::from_str(json).unwrap();
        assert!(debug.running);
        assert_eq!(debug.last_changed, Some(datetime!(2025-02-03 03:00 UTC)));
    }
}
