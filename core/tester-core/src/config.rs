//! Runtime configuration for a test session.
//!
//! Threaded explicitly through the driver rather than living in process
//! globals, so a test harness can exercise several sessions concurrently.

use std::time::Duration;

use crate::sampler::Sampler;

#[derive(Debug, Clone, Copy)]
pub struct TesterConfig {
    /// Percent at or below which a low-battery warning is recorded.
    pub low_battery_threshold: u8,
    /// Minimum spacing between periodic backups.
    pub backup_interval: Duration,
    /// Number of timestamped backups retained.
    pub keep_backups: usize,
    /// Poll cadence while waiting for AC disconnect.
    pub await_poll_interval: Duration,
    /// Poll cadence while monitoring the discharge.
    pub monitor_poll_interval: Duration,
    pub sampler: Sampler,
    pub skip_validation: bool,
    pub require_full_charge: bool,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            low_battery_threshold: 10,
            backup_interval: Duration::from_secs(5 * 60),
            keep_backups: 5,
            await_poll_interval: Duration::from_secs(5),
            monitor_poll_interval: Duration::from_secs(10),
            sampler: Sampler::default(),
            skip_validation: false,
            require_full_charge: true,
        }
    }
}
