//! Energy meter access.
//!
//! The poller only sees the [`Sensor`] trait. [`SmartPlug`] implements it
//! for TP-Link HS1xx plugs speaking their local TCP protocol.

pub mod codec;
mod outage;
mod smart_plug;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

pub use outage::{OutageAlarm, OutageStatus};
pub use smart_plug::{SmartPlug, SmartPlugConfig};

/// Instantaneous electrical readings, normalized to base units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
    /// Energy counter since the plug was last reset (Wh).
    pub total_energy_wh: f64,
}

#[derive(Debug, Error)]
pub enum SensorError {
    /// Device unreachable, connection dropped or timed out. Expected
    /// from time to time (plug unplugged, Wi-Fi hiccup).
    #[error("communication error: {0}")]
    Communication(#[from] io::Error),

    /// The device answered, but not with anything we understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Source of realtime energy readings.
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Query the meter once.
    ///
    /// Implementations must bound every wait so a hung device cannot
    /// stall the caller.
    async fn read_realtime(&self) -> Result<Reading, SensorError>;
}
