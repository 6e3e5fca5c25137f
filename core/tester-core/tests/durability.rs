//! Durability engine integration tests: atomic persistence, backup
//! rotation, and the corruption recovery cascade, against a real temp
//! filesystem.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs_err as fs;
use tempfile::TempDir;

use tester_core::{
    Durability, LoadOutcome, LogEntry, RootDocument, SessionStore, StorageConfig, TesterError,
};

const LAPTOP: &str = "LAPTOP-TEST";

fn storage(temp: &TempDir) -> StorageConfig {
    StorageConfig::with_root(temp.path().to_path_buf())
}

fn engine(temp: &TempDir) -> Durability {
    Durability::new(storage(temp), Duration::from_secs(300), 5)
}

fn sample_document() -> RootDocument {
    let mut store = SessionStore::new(RootDocument::new());
    store.register_laptop(LAPTOP, BTreeMap::new());
    store
        .start_run(LAPTOP, Utc::now(), BTreeMap::new(), None)
        .unwrap();
    for (percent, elapsed) in [(100u8, 0u64), (97, 120), (91, 480)] {
        store
            .append_entry(
                LAPTOP,
                LogEntry {
                    timestamp: Utc::now(),
                    battery_percent: percent,
                    elapsed_seconds: elapsed,
                    charging: false,
                },
            )
            .unwrap();
    }
    store.document().clone()
}

fn write_backup(config: &StorageConfig, stamp: &str, contents: &str) {
    config.ensure_dirs().unwrap();
    let path = config
        .backups_dir()
        .join(format!("battery_test_data_backup_{stamp}.json"));
    fs::write(path, contents).unwrap();
}

#[test]
fn persist_then_load_round_trips() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let doc = sample_document();

    durability.persist(&doc).unwrap();

    match durability.load().unwrap() {
        LoadOutcome::Loaded(loaded) => assert_eq!(loaded, doc),
        other => panic!("expected Loaded, got {other:?}"),
    }
}

#[test]
fn persist_leaves_no_temp_file_behind() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    durability.persist(&sample_document()).unwrap();

    assert!(storage(&temp).data_file().exists());
    assert!(!storage(&temp).data_file_tmp().exists());
}

#[test]
fn persist_overwrites_atomically() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);

    let first = RootDocument::new();
    durability.persist(&first).unwrap();

    let second = sample_document();
    durability.persist(&second).unwrap();

    match durability.load().unwrap() {
        LoadOutcome::Loaded(loaded) => assert_eq!(loaded, second),
        other => panic!("expected Loaded, got {other:?}"),
    }
}

#[test]
fn garbage_canonical_recovers_from_newest_valid_backup() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let config = storage(&temp);

    let doc = sample_document();
    let valid = serde_json::to_string(&doc).unwrap();

    // Older backup is valid; the newest one is itself garbage and must be
    // skipped; the canonical file is garbage too.
    write_backup(&config, "20260101_080000", &valid);
    write_backup(&config, "20260101_090000", "{ totally broken");
    config.ensure_dirs().unwrap();
    fs::write(config.data_file(), b"\x00\x01garbage bytes").unwrap();

    match durability.load().unwrap() {
        LoadOutcome::Recovered { doc: recovered, backup } => {
            assert_eq!(recovered, doc);
            assert!(backup
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .contains("20260101_080000"));
        }
        other => panic!("expected Recovered, got {other:?}"),
    }

    // The restored backup is now the canonical file.
    match durability.load().unwrap() {
        LoadOutcome::Loaded(loaded) => assert_eq!(loaded, doc),
        other => panic!("expected Loaded after restore, got {other:?}"),
    }
}

#[test]
fn corrupt_canonical_is_quarantined_not_discarded() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let config = storage(&temp);

    write_backup(
        &config,
        "20260101_080000",
        &serde_json::to_string(&sample_document()).unwrap(),
    );
    config.ensure_dirs().unwrap();
    fs::write(config.data_file(), "not json").unwrap();

    durability.load().unwrap();

    let quarantined: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("battery_test_data.corrupt_"))
        .collect();
    assert_eq!(quarantined.len(), 1, "unreadable file must be preserved");
}

#[test]
fn unrecoverable_when_no_backup_validates() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let config = storage(&temp);

    write_backup(&config, "20260101_080000", "also broken {");
    config.ensure_dirs().unwrap();
    fs::write(config.data_file(), "not json").unwrap();

    let err = durability.load().unwrap_err();
    match err {
        TesterError::Unrecoverable { quarantined } => assert!(quarantined.exists()),
        other => panic!("expected Unrecoverable, got {other:?}"),
    }
}

#[test]
fn newer_data_version_fails_closed_without_touching_file() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let config = storage(&temp);

    config.ensure_dirs().unwrap();
    let newer = r#"{"data_version": 99, "producer_version": "9.9.9", "laptops": {}}"#;
    fs::write(config.data_file(), newer).unwrap();

    let err = durability.load().unwrap_err();
    assert!(matches!(err, TesterError::UnsupportedVersion { found: 99, .. }));

    // The newer producer's file must be left intact — no quarantine, no
    // backup restored over it.
    assert_eq!(fs::read_to_string(config.data_file()).unwrap(), newer);
}

#[test]
fn backup_rotation_keeps_newest_five() {
    let temp = TempDir::new().unwrap();
    let mut durability = engine(&temp);
    let config = storage(&temp);

    let valid = serde_json::to_string(&sample_document()).unwrap();
    for hour in 1..=7 {
        write_backup(&config, &format!("20260101_0{hour}0000"), &valid);
    }

    durability.persist(&sample_document()).unwrap();
    durability.backup(Instant::now()).unwrap();

    let mut names: Vec<_> = fs::read_dir(config.backups_dir())
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    assert_eq!(names.len(), 5, "exactly K=5 backups retained");
    // The survivors are the most recent by timestamp: hours 4..=7 plus the
    // fresh backup created above.
    assert_eq!(names[0], "battery_test_data_backup_20260101_040000.json");
    assert!(names[4] > names[3]);
}

#[test]
fn backup_twice_within_interval_creates_one_file() {
    let temp = TempDir::new().unwrap();
    let mut durability = engine(&temp);
    let config = storage(&temp);

    durability.persist(&sample_document()).unwrap();

    let t0 = Instant::now();
    assert!(durability.backup_if_due(t0).unwrap().is_some());
    assert!(durability
        .backup_if_due(t0 + Duration::from_secs(30))
        .unwrap()
        .is_none());

    let count = fs::read_dir(config.backups_dir()).unwrap().flatten().count();
    assert_eq!(count, 1);
}

#[test]
fn v1_file_on_disk_loads_via_migration() {
    let temp = TempDir::new().unwrap();
    let durability = engine(&temp);
    let config = storage(&temp);

    config.ensure_dirs().unwrap();
    let v1 = r#"{
        "data_version": "1.0",
        "current_laptop_id": "LAPTOP-OLD",
        "script_version": "1.0.0",
        "laptops": {
            "LAPTOP-OLD": {
                "laptop_id": "LAPTOP-OLD",
                "test_runs": [{
                    "run_id": "run_2025-11-02_08-00-00",
                    "status": "interrupted",
                    "started_at": "2025-11-02T08:00:00Z",
                    "total_elapsed_seconds": 900,
                    "entries": [{
                        "timestamp": "2025-11-02T08:00:10Z",
                        "battery_percent": 100,
                        "elapsed_seconds": 0
                    }]
                }]
            }
        }
    }"#;
    fs::write(config.data_file(), v1).unwrap();

    match durability.load().unwrap() {
        LoadOutcome::Loaded(doc) => {
            assert_eq!(doc.data_version, tester_core::CURRENT_DATA_VERSION);
            let run = &doc.laptops["LAPTOP-OLD"].test_runs[0];
            assert!(!run.resumed);
            assert!(!run.entries[0].charging);
        }
        other => panic!("expected Loaded, got {other:?}"),
    }
}
