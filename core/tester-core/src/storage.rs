//! Storage configuration and path management.
//!
//! Centralizes every file path the tester touches so production code and
//! tests agree on layout. Production uses `StorageConfig::default()` which
//! roots everything under `~/.battery-tester/`; tests inject a temp root via
//! `StorageConfig::with_root()`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;

/// Central configuration for all tester storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        Self {
            root: home.join(".battery-tester"),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the canonical data file.
    pub fn data_file(&self) -> PathBuf {
        self.root.join("battery_test_data.json")
    }

    /// Path used while writing a new revision of the data file; committed
    /// with an atomic rename so readers never see a partial document.
    pub fn data_file_tmp(&self) -> PathBuf {
        self.root.join("battery_test_data.json.tmp")
    }

    /// Directory holding timestamped backups of the data file.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Where an unreadable canonical file is renamed aside for forensics.
    pub fn quarantine_file(&self, at: DateTime<Utc>) -> PathBuf {
        self.root.join(format!(
            "battery_test_data.corrupt_{}.json",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Backup filename for the data file at the given instant, sortable
    /// lexicographically by timestamp.
    pub fn backup_file(&self, at: DateTime<Utc>) -> PathBuf {
        self.backups_dir().join(format!(
            "battery_test_data_backup_{}.json",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Prefix/suffix pair identifying backup files in `backups_dir`.
    pub fn backup_name_bounds() -> (&'static str, &'static str) {
        ("battery_test_data_backup_", ".json")
    }

    /// Ensures the root and backups directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_are_rooted() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/bt"));
        assert_eq!(
            config.data_file(),
            PathBuf::from("/tmp/bt/battery_test_data.json")
        );
        assert_eq!(config.backups_dir(), PathBuf::from("/tmp/bt/backups"));
    }

    #[test]
    fn backup_names_sort_by_timestamp() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/bt"));
        let earlier = "2026-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();
        let later = "2026-01-02T03:05:05Z".parse::<DateTime<Utc>>().unwrap();
        let a = config.backup_file(earlier);
        let b = config.backup_file(later);
        assert!(a.file_name().unwrap() < b.file_name().unwrap());
        assert_eq!(
            a.file_name().unwrap().to_str().unwrap(),
            "battery_test_data_backup_20260102_030405.json"
        );
    }

    #[test]
    fn ensure_dirs_creates_structure() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_root(temp.path().join("data"));
        config.ensure_dirs().unwrap();
        assert!(config.root().exists());
        assert!(config.backups_dir().exists());
    }
}
