//! Node telemetry types
//!
//! Device metrics reported periodically by mesh nodes. A battery level
//! of 101 is the firmware's marker for externally powered devices.

use serde::{Deserialize, Serialize};

/// Battery level value meaning "on external power"
pub const BATTERY_POWERED: u8 = 101;

/// Device metrics snapshot for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Battery level percent, 101 = external power
    pub battery_level: Option<u8>,
    /// Battery voltage in volts
    pub voltage: Option<f64>,
    /// Channel utilization percent
    pub channel_utilization: Option<f64>,
    /// Airtime transmit utilization percent
    pub air_util_tx: Option<f64>,
    /// Device uptime in seconds
    pub uptime_seconds: Option<u64>,
}

impl TelemetrySnapshot {
    /// Battery rendered as integer percent, or "PWR" for powered nodes
    pub fn battery_text(&self) -> String {
        match self.battery_level {
            Some(BATTERY_POWERED) => "PWR".to_string(),
            Some(level) => format!("{level}%"),
            None => "N/A".to_string(),
        }
    }

    /// Utilization percentage rendered with two decimals
    pub fn percent_text(value: Option<f64>) -> String {
        match value {
            Some(v) => format!("{v:.2}%"),
            None => "N/A".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_text() {
        let mut t = TelemetrySnapshot::default();
        assert_eq!(t.battery_text(), "N/A");

        t.battery_level = Some(87);
        assert_eq!(t.battery_text(), "87%");

        t.battery_level = Some(BATTERY_POWERED);
        assert_eq!(t.battery_text(), "PWR");
    }

    #[test]
    fn test_percent_text() {
        assert_eq!(TelemetrySnapshot::percent_text(Some(12.345)), "12.35%");
        assert_eq!(TelemetrySnapshot::percent_text(None), "N/A");
    }
}
