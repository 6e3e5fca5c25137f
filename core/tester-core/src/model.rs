//! Durable data model for battery test sessions.
//!
//! These types *are* the on-disk schema: the `RootDocument` is serialized as
//! one JSON file, so every field here is part of the persisted format.
//! Additive changes are fine; renames and removals require a `data_version`
//! bump and a migration step (see `migrate`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written by this producer. Documents with a newer version
/// fail closed on load; older versions go through `migrate` first.
pub const CURRENT_DATA_VERSION: u32 = 2;

/// Lifecycle status of a single test run. Everything except `InProgress`
/// is terminal: no further entries are appended once a run reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Interrupted,
    LowBatteryShutdown,
    HardShutdown,
    Invalidated,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::LowBatteryShutdown => "low_battery_shutdown",
            RunStatus::HardShutdown => "hard_shutdown",
            RunStatus::Invalidated => "invalidated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerEventKind {
    TestStarted,
    ChargingDetected,
    ChargingStopped,
}

/// One sampled data point. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub battery_percent: u8,
    pub elapsed_seconds: u64,
    pub charging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "event")]
    pub kind: PowerEventKind,
    pub ac_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowBatteryEvent {
    pub timestamp: DateTime<Utc>,
    pub battery_percent: u8,
    /// Fixed to `"low_battery_warning"` in the file format.
    #[serde(rename = "event")]
    pub kind: String,
}

impl LowBatteryEvent {
    pub fn warning(timestamp: DateTime<Utc>, battery_percent: u8) -> Self {
        Self {
            timestamp,
            battery_percent,
            kind: "low_battery_warning".to_string(),
        }
    }
}

/// Battery health snapshot taken at run start. Every field may be unknown;
/// the power-supply interface exposes capacities on some machines only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryHealth {
    #[serde(default)]
    pub design_capacity_mwh: Option<u64>,
    #[serde(default)]
    pub full_charge_capacity_mwh: Option<u64>,
    #[serde(default)]
    pub health_percent: Option<f64>,
    #[serde(default)]
    pub cycles: Option<u32>,
}

impl BatteryHealth {
    /// Derives `health_percent` from the capacities when both are present.
    pub fn with_derived_health(mut self) -> Self {
        if let (Some(design), Some(full)) = (self.design_capacity_mwh, self.full_charge_capacity_mwh)
        {
            if design > 0 {
                self.health_percent = Some((full as f64 / design as f64 * 10000.0).round() / 100.0);
            }
        }
        self
    }
}

/// One discharge session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_elapsed_seconds: u64,
    #[serde(default)]
    pub resumed: bool,
    #[serde(default)]
    pub battery_health: Option<BatteryHealth>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub power_events: Vec<PowerEvent>,
    #[serde(default)]
    pub low_battery_events: Vec<LowBatteryEvent>,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

impl TestRun {
    pub fn new(
        started_at: DateTime<Utc>,
        metadata: BTreeMap<String, Value>,
        battery_health: Option<BatteryHealth>,
    ) -> Self {
        Self {
            run_id: Self::allocate_id(started_at),
            status: RunStatus::InProgress,
            started_at,
            ended_at: None,
            total_elapsed_seconds: 0,
            resumed: false,
            battery_health,
            metadata,
            power_events: Vec::new(),
            low_battery_events: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Run ids are time-derived and unique within a laptop as long as runs
    /// start at least a second apart, which the driver guarantees.
    pub fn allocate_id(started_at: DateTime<Utc>) -> String {
        format!("run_{}", started_at.format("%Y-%m-%d_%H-%M-%S"))
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}

/// Identity plus full test history for one machine. `test_runs` is
/// append-only; insertion order is chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaptopRecord {
    pub laptop_id: String,
    #[serde(default)]
    pub hardware_info: BTreeMap<String, Value>,
    #[serde(default)]
    pub test_runs: Vec<TestRun>,
}

impl LaptopRecord {
    pub fn new(laptop_id: impl Into<String>, hardware_info: BTreeMap<String, Value>) -> Self {
        Self {
            laptop_id: laptop_id.into(),
            hardware_info,
            test_runs: Vec::new(),
        }
    }

    /// The in-progress run, if any. Only the latest run can be in progress.
    pub fn current_run(&self) -> Option<&TestRun> {
        self.test_runs
            .last()
            .filter(|run| run.status == RunStatus::InProgress)
    }

    pub fn current_run_mut(&mut self) -> Option<&mut TestRun> {
        self.test_runs
            .last_mut()
            .filter(|run| run.status == RunStatus::InProgress)
    }
}

/// Top-level durable unit: the whole data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootDocument {
    pub data_version: u32,
    #[serde(default)]
    pub current_laptop_id: Option<String>,
    pub producer_version: String,
    #[serde(default)]
    pub laptops: BTreeMap<String, LaptopRecord>,
}

impl RootDocument {
    pub fn new() -> Self {
        Self {
            data_version: CURRENT_DATA_VERSION,
            current_laptop_id: None,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            laptops: BTreeMap::new(),
        }
    }
}

impl Default for RootDocument {
    fn default() -> Self {
        Self::new()
    }
}
