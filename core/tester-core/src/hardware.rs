//! Hardware identity, battery health, and test metadata collection.
//!
//! Thin data sources: everything here produces opaque snapshots the core
//! stores verbatim. The laptop id must stay stable across reboots for the
//! same machine, so it hashes slow-moving identity fields only.

use std::collections::BTreeMap;
use std::path::Path;

use fs_err as fs;
use serde_json::{json, Value};
use sysinfo::System;
use tracing::debug;

use crate::model::BatteryHealth;

/// Collects the hardware snapshot stored on the laptop record.
pub fn hardware_snapshot() -> BTreeMap<String, Value> {
    let mut sys = System::new_all();
    sys.refresh_all();

    let mut info = BTreeMap::new();
    let cpu = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_default();
    info.insert("cpu".to_string(), json!(cpu));
    info.insert(
        "cpu_cores".to_string(),
        json!(sys.physical_core_count()),
    );
    info.insert("cpu_logical_cores".to_string(), json!(sys.cpus().len()));
    info.insert(
        "ram_gb".to_string(),
        json!((sys.total_memory() as f64 / 1024_f64.powi(3) * 100.0).round() / 100.0),
    );
    info.insert("os_name".to_string(), json!(System::name()));
    info.insert("os_version".to_string(), json!(System::os_version()));
    info.insert("kernel_version".to_string(), json!(System::kernel_version()));
    info.insert("hostname".to_string(), json!(System::host_name()));
    info
}

/// Derives the opaque, stable laptop id: `LAPTOP-<8 hex>` over identity
/// fields that survive reboots and OS updates.
pub fn generate_laptop_id() -> String {
    let mut sys = System::new_all();
    sys.refresh_all();
    let cpu = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_default();
    let identity = format!(
        "{}-{}-{}",
        System::name().unwrap_or_default(),
        cpu,
        System::host_name().unwrap_or_default(),
    );
    let digest = format!("{:x}", md5::compute(identity.as_bytes()));
    format!("LAPTOP-{}", digest[..8].to_uppercase())
}

/// Battery health snapshot from `/sys/class/power_supply`. Returns `None`
/// when no battery exposes capacity data; individual fields stay `None`
/// when the firmware omits them.
pub fn battery_health_snapshot(root: &Path) -> Option<BatteryHealth> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let supply = entry.path();
        if read_trimmed(&supply.join("type")).as_deref() != Some("Battery") {
            continue;
        }

        // Prefer energy_* (µWh) over charge_* (µAh); either pair yields a
        // meaningful health percent, only energy converts to mWh exactly.
        let design = read_micro(&supply.join("energy_full_design"))
            .or_else(|| read_micro(&supply.join("charge_full_design")));
        let full = read_micro(&supply.join("energy_full"))
            .or_else(|| read_micro(&supply.join("charge_full")));
        let cycles = read_trimmed(&supply.join("cycle_count"))
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|count| *count > 0);

        if design.is_none() && full.is_none() && cycles.is_none() {
            debug!(supply = %supply.display(), "battery exposes no health fields");
            return None;
        }

        return Some(
            BatteryHealth {
                design_capacity_mwh: design,
                full_charge_capacity_mwh: full,
                health_percent: None,
                cycles,
            }
            .with_derived_health(),
        );
    }
    None
}

/// Test environment metadata captured at run start.
pub fn collect_metadata(notes: Option<&str>) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "os_version".to_string(),
        json!(format!(
            "{} {}",
            System::name().unwrap_or_default(),
            System::os_version().unwrap_or_default()
        )),
    );
    metadata.insert("kernel_version".to_string(), json!(System::kernel_version()));
    metadata.insert("hostname".to_string(), json!(System::host_name()));
    metadata.insert(
        "producer_version".to_string(),
        json!(env!("CARGO_PKG_VERSION")),
    );
    metadata.insert("notes".to_string(), json!(notes.unwrap_or("")));
    metadata
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|value| value.trim().to_string())
}

/// Reads a µWh/µAh sysfs value and scales to the mWh-denominated field.
fn read_micro(path: &Path) -> Option<u64> {
    read_trimmed(path)
        .and_then(|value| value.parse::<u64>().ok())
        .map(|micro| micro / 1000)
}
