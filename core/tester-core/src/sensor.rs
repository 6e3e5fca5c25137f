//! Battery sensor contract and the Linux power-supply implementation.
//!
//! The core only ever sees `BatteryReading`s through the `Sensor` trait; the
//! platform adapter below is a thin data source and tests substitute a
//! scripted fake. A failed read is always `Unavailable` — the driver skips
//! the cycle and retries on the next tick.

use std::path::{Path, PathBuf};

use fs_err as fs;

/// Point-in-time battery state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    /// State of charge, 0..=100.
    pub percent: u8,
    pub charging: bool,
    pub ac_connected: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("battery sensor unavailable: {0}")]
    Unavailable(String),
}

/// External battery-reading source. Reads are idempotent and stateless, so
/// skipping a failed cycle is always safe.
pub trait Sensor {
    fn read(&mut self) -> Result<BatteryReading, SensorError>;
}

/// Sensor backed by `/sys/class/power_supply`. Reports `Unavailable` on
/// platforms or machines where the interface is missing.
#[derive(Debug, Clone)]
pub struct PlatformSensor {
    root: PathBuf,
}

impl Default for PlatformSensor {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/class/power_supply"),
        }
    }
}

impl PlatformSensor {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Sensor for PlatformSensor {
    fn read(&mut self) -> Result<BatteryReading, SensorError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|err| SensorError::Unavailable(format!("{}: {}", self.root.display(), err)))?;

        let mut battery: Option<(u8, String)> = None;
        let mut mains_online = false;

        for entry in entries.flatten() {
            let supply = entry.path();
            match read_trimmed(&supply.join("type")).as_deref() {
                Some("Battery") => {
                    if battery.is_some() {
                        continue;
                    }
                    let percent = read_trimmed(&supply.join("capacity"))
                        .and_then(|value| value.parse::<u16>().ok())
                        .map(|value| value.min(100) as u8);
                    let status =
                        read_trimmed(&supply.join("status")).unwrap_or_else(|| "Unknown".into());
                    if let Some(percent) = percent {
                        battery = Some((percent, status));
                    }
                }
                Some("Mains") => {
                    if read_trimmed(&supply.join("online")).as_deref() == Some("1") {
                        mains_online = true;
                    }
                }
                _ => {}
            }
        }

        let (percent, status) = battery.ok_or_else(|| {
            SensorError::Unavailable(format!("no battery under {}", self.root.display()))
        })?;

        let charging = status == "Charging";
        // A battery reporting Full or Charging implies the charger is
        // attached even when no Mains supply is exposed.
        let ac_connected = mains_online || charging || status == "Full";

        Ok(BatteryReading {
            percent,
            charging,
            ac_connected,
        })
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|value| value.trim().to_string())
}
