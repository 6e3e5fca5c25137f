//! Document parsing, schema validation, and versioned migration.
//!
//! Loads go through one pipeline: JSON parse, `data_version` gate, explicit
//! value-level migration for known-older versions, then the typed decode.
//! A version newer than `CURRENT_DATA_VERSION` fails closed; guessing a
//! lossy downgrade would destroy a newer producer's data.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{Result, TesterError};
use crate::model::{RootDocument, CURRENT_DATA_VERSION};

/// Parses and validates raw file contents into a current-version document.
pub fn parse_document(raw: &str, path: &Path) -> Result<RootDocument> {
    let mut value: Value = serde_json::from_str(raw).map_err(|err| TesterError::Corrupt {
        path: path.to_path_buf(),
        details: format!("invalid JSON: {err}"),
    })?;

    let version = read_version(&value, path)?;
    if version > CURRENT_DATA_VERSION {
        return Err(TesterError::UnsupportedVersion {
            found: version,
            supported: CURRENT_DATA_VERSION,
        });
    }

    if !value
        .get("laptops")
        .map(Value::is_object)
        .unwrap_or(false)
    {
        return Err(TesterError::Corrupt {
            path: path.to_path_buf(),
            details: "missing laptops field".to_string(),
        });
    }

    if version < CURRENT_DATA_VERSION {
        info!(from = version, to = CURRENT_DATA_VERSION, "migrating data file");
        migrate_v1_to_v2(&mut value);
    }

    serde_json::from_value(value).map_err(|err| TesterError::Corrupt {
        path: path.to_path_buf(),
        details: format!("schema validation failed: {err}"),
    })
}

/// `data_version` is an integer since v2; v1 files wrote the string "1.0".
fn read_version(value: &Value, path: &Path) -> Result<u32> {
    match value.get("data_version") {
        Some(Value::Number(number)) => number.as_u64().map(|v| v as u32).ok_or_else(|| {
            TesterError::Corrupt {
                path: path.to_path_buf(),
                details: "data_version is not an unsigned integer".to_string(),
            }
        }),
        Some(Value::String(text)) => text
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
            .ok_or_else(|| TesterError::Corrupt {
                path: path.to_path_buf(),
                details: format!("unparseable data_version {text:?}"),
            }),
        _ => Err(TesterError::Corrupt {
            path: path.to_path_buf(),
            details: "missing data_version field".to_string(),
        }),
    }
}

/// v1 → v2, idempotent: normalizes `data_version` to an integer, fills the
/// fields v1 documents did not carry (`producer_version`, per-run `resumed`
/// and `low_battery_events`, per-entry `charging`).
fn migrate_v1_to_v2(value: &mut Value) {
    let Some(root) = value.as_object_mut() else {
        return;
    };
    root.insert("data_version".to_string(), Value::from(CURRENT_DATA_VERSION));
    if !root.contains_key("producer_version") {
        let legacy = root
            .get("script_version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        root.insert("producer_version".to_string(), Value::from(legacy));
    }

    let Some(laptops) = root.get_mut("laptops").and_then(Value::as_object_mut) else {
        return;
    };
    for laptop in laptops.values_mut() {
        let Some(runs) = laptop.get_mut("test_runs").and_then(Value::as_array_mut) else {
            continue;
        };
        for run in runs.iter_mut().filter_map(Value::as_object_mut) {
            run.entry("resumed").or_insert(Value::from(false));
            run.entry("low_battery_events")
                .or_insert(Value::Array(Vec::new()));
            if let Some(entries) = run.get_mut("entries").and_then(Value::as_array_mut) {
                for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                    entry.entry("charging").or_insert(Value::from(false));
                }
            }
        }
    }
}
