//! Pre-test validation.
//!
//! A test starts plugged in at a full charge. Errors block the test (the
//! process exits non-zero); warnings are reported and recorded but do not
//! block.

use tracing::warn;

use crate::model::BatteryHealth;
use crate::sensor::BatteryReading;

/// Battery health below this percent produces a warning.
const HEALTH_WARN_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub battery_detected: bool,
    pub battery_full: bool,
    pub ac_connected: bool,
    pub health_ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs every pre-test check against one sensor reading and an optional
/// health snapshot. `reading` is `None` when the sensor itself failed.
pub fn validate_pretest(
    reading: Option<&BatteryReading>,
    health: Option<&BatteryHealth>,
    require_full_charge: bool,
) -> ValidationReport {
    let mut report = ValidationReport {
        health_ok: true,
        ..ValidationReport::default()
    };

    let Some(reading) = reading else {
        report
            .errors
            .push("battery not detected by the system".to_string());
        return report;
    };
    report.battery_detected = true;

    report.battery_full = reading.percent >= 100;
    if require_full_charge && !report.battery_full {
        report.errors.push(format!(
            "battery is at {}% (must start at 100%)",
            reading.percent
        ));
    }

    report.ac_connected = reading.ac_connected;
    if !reading.ac_connected {
        report
            .errors
            .push("AC power is not connected; start the test plugged in".to_string());
    }

    match health.and_then(|health| health.health_percent) {
        Some(percent) if percent < HEALTH_WARN_THRESHOLD => {
            report.health_ok = false;
            let message = format!(
                "battery health is {percent:.1}% (below {HEALTH_WARN_THRESHOLD:.0}% threshold)"
            );
            warn!(health_percent = percent, "battery health below threshold");
            report.warnings.push(message);
        }
        Some(_) => {}
        None => {
            report
                .warnings
                .push("could not retrieve battery health information".to_string());
        }
    }

    report
}
