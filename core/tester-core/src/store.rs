//! In-memory session store.
//!
//! The store exclusively owns the `RootDocument` for the process lifetime.
//! Every mutation is synchronous and in-memory; making it durable is a
//! separate, explicit `Durability::persist` call so the driver controls
//! exactly when a sync-to-disk happens, decoupling sampling rate from write
//! rate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TesterError};
use crate::model::{
    BatteryHealth, LaptopRecord, LogEntry, LowBatteryEvent, PowerEvent, PowerEventKind,
    RootDocument, RunStatus, TestRun,
};

pub struct SessionStore {
    doc: RootDocument,
}

impl SessionStore {
    pub fn new(doc: RootDocument) -> Self {
        Self { doc }
    }

    pub fn document(&self) -> &RootDocument {
        &self.doc
    }

    /// Registers this machine (no-op if already present) and marks it as the
    /// current laptop.
    pub fn register_laptop(&mut self, laptop_id: &str, hardware_info: BTreeMap<String, Value>) {
        self.doc
            .laptops
            .entry(laptop_id.to_string())
            .or_insert_with(|| LaptopRecord::new(laptop_id, hardware_info));
        self.doc.current_laptop_id = Some(laptop_id.to_string());
    }

    pub fn laptop(&self, laptop_id: &str) -> Option<&LaptopRecord> {
        self.doc.laptops.get(laptop_id)
    }

    pub fn current_run(&self, laptop_id: &str) -> Option<&TestRun> {
        self.doc
            .laptops
            .get(laptop_id)
            .and_then(LaptopRecord::current_run)
    }

    fn current_run_mut(&mut self, laptop_id: &str) -> Result<&mut TestRun> {
        self.doc
            .laptops
            .get_mut(laptop_id)
            .ok_or_else(|| TesterError::LaptopUnknown(laptop_id.to_string()))?
            .current_run_mut()
            .ok_or_else(|| TesterError::NoActiveRun(laptop_id.to_string()))
    }

    /// Starts a new run. Fails with `DuplicateInProgress` when one exists;
    /// the caller must resolve that through the resume controller first.
    pub fn start_run(
        &mut self,
        laptop_id: &str,
        started_at: DateTime<Utc>,
        metadata: BTreeMap<String, Value>,
        battery_health: Option<BatteryHealth>,
    ) -> Result<&TestRun> {
        let record = self
            .doc
            .laptops
            .get_mut(laptop_id)
            .ok_or_else(|| TesterError::LaptopUnknown(laptop_id.to_string()))?;

        if record.current_run().is_some() {
            return Err(TesterError::DuplicateInProgress(laptop_id.to_string()));
        }

        let run = TestRun::new(started_at, metadata, battery_health);
        debug!(laptop_id, run_id = %run.run_id, "test run created");
        record.test_runs.push(run);
        Ok(record
            .test_runs
            .last()
            .expect("run pushed above"))
    }

    /// Appends a sampled entry to the in-progress run and tracks the run's
    /// total elapsed time.
    pub fn append_entry(&mut self, laptop_id: &str, entry: LogEntry) -> Result<()> {
        let run = self.current_run_mut(laptop_id)?;
        if let Some(last) = run.entries.last() {
            if entry.elapsed_seconds <= last.elapsed_seconds {
                warn!(
                    laptop_id,
                    last = last.elapsed_seconds,
                    next = entry.elapsed_seconds,
                    "log entry elapsed time did not advance"
                );
            }
        }
        run.total_elapsed_seconds = entry.elapsed_seconds;
        run.entries.push(entry);
        Ok(())
    }

    pub fn append_power_event(
        &mut self,
        laptop_id: &str,
        timestamp: DateTime<Utc>,
        kind: PowerEventKind,
        ac_connected: bool,
        battery_percent: Option<u8>,
    ) -> Result<()> {
        let run = self.current_run_mut(laptop_id)?;
        run.power_events.push(PowerEvent {
            timestamp,
            kind,
            ac_connected,
            battery_percent,
        });
        Ok(())
    }

    pub fn append_low_battery_event(
        &mut self,
        laptop_id: &str,
        timestamp: DateTime<Utc>,
        battery_percent: u8,
    ) -> Result<()> {
        let run = self.current_run_mut(laptop_id)?;
        run.low_battery_events
            .push(LowBatteryEvent::warning(timestamp, battery_percent));
        Ok(())
    }

    pub fn mark_resumed(&mut self, laptop_id: &str) -> Result<()> {
        let run = self.current_run_mut(laptop_id)?;
        run.resumed = true;
        Ok(())
    }

    /// Moves the in-progress run to a terminal status.
    pub fn finalize_run(
        &mut self,
        laptop_id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let run = self.current_run_mut(laptop_id)?;
        run.status = status;
        run.ended_at = Some(ended_at);
        debug!(laptop_id, run_id = %run.run_id, status = status.as_str(), "test run finalized");
        Ok(())
    }
}
