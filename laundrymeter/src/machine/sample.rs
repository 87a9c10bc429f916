use time::OffsetDateTime;

use crate::sensor::Reading;

/// One row of machine history, produced once per poll tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: OffsetDateTime,
    /// Debounced state, not the instantaneous reading.
    pub running: bool,
    /// Timestamp of the sample that introduced the current `running` value.
    pub last_changed: Option<OffsetDateTime>,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub total_energy: f64,
}

impl Sample {
    pub fn from_reading(
        timestamp: OffsetDateTime,
        running: bool,
        last_changed: OffsetDateTime,
        reading: &Reading,
    ) -> Self {
        Self {
            timestamp,
            running,
            last_changed: Some(last_changed),
            voltage: reading.voltage_v,
            current: reading.current_a,
            power: reading.power_w,
            total_energy: reading.total_energy_wh,
        }
    }

    /// Placeholder written when the sensor could not be read.
    pub fn sensor_failure(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            running: false,
            last_changed: None,
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            total_energy: 0.0,
        }
    }

    pub fn is_sensor_failure(&self) -> bool {
        self.last_changed.is_none()
    }
}
