//! Durability engine: atomic persistence, timestamped backups, recovery.
//!
//! The canonical data file is only ever replaced via write-to-temp plus
//! atomic rename, so a reader never observes a partial document. Backups are
//! plain copies of the *current persisted* canonical file, rotated to the
//! newest K by filename order. Recovery quarantines an unreadable canonical
//! file (forensic evidence is renamed aside, never overwritten) and walks
//! the backups newest-first until one validates.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs_err as fs;
use tracing::{debug, info, warn};

use crate::error::{Result, TesterError};
use crate::migrate;
use crate::model::RootDocument;
use crate::storage::StorageConfig;

/// Outcome of loading the canonical file.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No data file exists yet.
    Absent,
    /// The canonical file parsed and validated.
    Loaded(RootDocument),
    /// The canonical file was unreadable; this backup's contents were
    /// restored over it.
    Recovered { doc: RootDocument, backup: PathBuf },
}

pub struct Durability {
    storage: StorageConfig,
    backup_interval: Duration,
    keep_backups: usize,
    last_backup: Option<Instant>,
}

impl Durability {
    pub fn new(storage: StorageConfig, backup_interval: Duration, keep_backups: usize) -> Self {
        Self {
            storage,
            backup_interval,
            keep_backups,
            last_backup: None,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Writes the full document atomically over the canonical file.
    pub fn persist(&self, doc: &RootDocument) -> Result<()> {
        self.storage
            .ensure_dirs()
            .map_err(|err| TesterError::io("creating storage directories", err))?;

        let payload = serde_json::to_vec_pretty(doc)
            .map_err(|err| TesterError::json("serializing data file", err))?;

        let tmp = self.storage.data_file_tmp();
        fs::write(&tmp, payload).map_err(|err| TesterError::io("writing data file", err))?;
        if let Err(err) = fs::rename(&tmp, self.storage.data_file()) {
            let _ = fs::remove_file(&tmp);
            return Err(TesterError::io("committing data file", err));
        }
        Ok(())
    }

    /// Whether the backup interval has elapsed since the last backup.
    /// The first call in a process is always due.
    pub fn should_backup(&self, now: Instant) -> bool {
        match self.last_backup {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.backup_interval,
        }
    }

    /// Copies the current canonical file to a timestamped backup and prunes
    /// old ones. A missing canonical file is a no-op.
    pub fn backup(&mut self, now: Instant) -> Result<Option<PathBuf>> {
        let data_file = self.storage.data_file();
        if !data_file.exists() {
            return Ok(None);
        }

        self.storage
            .ensure_dirs()
            .map_err(|err| TesterError::io("creating storage directories", err))?;

        let target = self.storage.backup_file(Utc::now());
        fs::copy(&data_file, &target).map_err(|err| TesterError::io("copying backup", err))?;
        self.last_backup = Some(now);
        debug!(path = %target.display(), "backup created");

        self.prune_backups();
        Ok(Some(target))
    }

    /// `backup` gated on the interval; at most one new backup per window.
    pub fn backup_if_due(&mut self, now: Instant) -> Result<Option<PathBuf>> {
        if !self.should_backup(now) {
            return Ok(None);
        }
        self.backup(now)
    }

    /// Backup files sorted by name, oldest first. Timestamped names make
    /// this chronological order.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let dir = self.storage.backups_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let (prefix, suffix) = StorageConfig::backup_name_bounds();
        let mut backups: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|err| TesterError::io("listing backups", err))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(prefix) && name.ends_with(suffix))
                    .unwrap_or(false)
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn prune_backups(&self) {
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(err) => {
                warn!(error = %err, "could not list backups for rotation");
                return;
            }
        };
        if backups.len() <= self.keep_backups {
            return;
        }
        let excess = backups.len() - self.keep_backups;
        for stale in &backups[..excess] {
            if let Err(err) = fs::remove_file(stale) {
                warn!(path = %stale.display(), error = %err, "could not remove old backup");
            }
        }
    }

    /// Loads the canonical file, recovering from backups when it is corrupt.
    ///
    /// A document written by a newer producer fails closed: the file is left
    /// untouched and no backup is restored over it. Corruption quarantines
    /// the canonical file first; if no backup validates either, the caller
    /// gets `Unrecoverable` and must start fresh.
    pub fn load(&self) -> Result<LoadOutcome> {
        let data_file = self.storage.data_file();
        let raw = match fs::read_to_string(&data_file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadOutcome::Absent)
            }
            Err(err) => return Err(TesterError::io("reading data file", err)),
        };

        match migrate::parse_document(&raw, &data_file) {
            Ok(doc) => Ok(LoadOutcome::Loaded(doc)),
            Err(err @ TesterError::UnsupportedVersion { .. }) => Err(err),
            Err(err) => {
                warn!(error = %err, "canonical data file is corrupt; attempting recovery");
                let quarantined = self.storage.quarantine_file(Utc::now());
                fs::rename(&data_file, &quarantined)
                    .map_err(|err| TesterError::io("quarantining corrupt data file", err))?;
                info!(path = %quarantined.display(), "corrupt data file preserved");
                self.recover_from_backups(quarantined)
            }
        }
    }

    fn recover_from_backups(&self, quarantined: PathBuf) -> Result<LoadOutcome> {
        let mut backups = self.list_backups()?;
        backups.reverse(); // newest first

        for backup in backups {
            let raw = match fs::read_to_string(&backup) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %backup.display(), error = %err, "could not read backup");
                    continue;
                }
            };
            match migrate::parse_document(&raw, &backup) {
                Ok(doc) => {
                    fs::copy(&backup, self.storage.data_file())
                        .map_err(|err| TesterError::io("restoring backup", err))?;
                    info!(path = %backup.display(), "recovered data file from backup");
                    return Ok(LoadOutcome::Recovered { doc, backup });
                }
                Err(err) => {
                    warn!(path = %backup.display(), error = %err, "backup did not validate");
                }
            }
        }

        Err(TesterError::Unrecoverable { quarantined })
    }
}
