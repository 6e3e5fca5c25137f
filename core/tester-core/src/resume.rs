//! Resume controller: startup classification and the resume-vs-start-new
//! decision.
//!
//! A true hard shutdown never lets the live process record its own terminal
//! state, so the status of an abandoned run is a heuristic applied here, at
//! the next startup, from the last durably recorded percent.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{Result, TesterError};
use crate::model::RunStatus;
use crate::sampler::SampleBaseline;
use crate::store::SessionStore;

/// Where a resumed session picks up: elapsed-time baseline and the last
/// logged percent. An in-progress run with zero entries resumes from zero
/// with no percent baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub elapsed_seconds: u64,
    pub battery_percent: Option<u8>,
}

impl ResumePoint {
    /// Seed for the sampler; `None` when the run had no entries yet.
    pub fn baseline(&self) -> Option<SampleBaseline> {
        self.battery_percent.map(|battery_percent| SampleBaseline {
            elapsed_seconds: self.elapsed_seconds,
            battery_percent,
        })
    }
}

/// Classification of persisted state for the current laptop at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupState {
    /// No record of this laptop; proceed to a fresh start.
    NoHistory,
    /// The latest run reached a terminal status; previous runs are retained
    /// and a fresh start is fine.
    CleanHistory { last_status: RunStatus },
    /// An in-progress run was found; the caller must decide resume vs
    /// start-new before anything else touches the store.
    Incomplete {
        run_id: String,
        resume_point: ResumePoint,
    },
}

pub fn classify(store: &SessionStore, laptop_id: &str) -> StartupState {
    let Some(record) = store.laptop(laptop_id) else {
        return StartupState::NoHistory;
    };
    let Some(last) = record.test_runs.last() else {
        return StartupState::NoHistory;
    };

    if last.status != RunStatus::InProgress {
        return StartupState::CleanHistory {
            last_status: last.status,
        };
    }

    let resume_point = last
        .last_entry()
        .map(|entry| ResumePoint {
            elapsed_seconds: entry.elapsed_seconds,
            battery_percent: Some(entry.battery_percent),
        })
        .unwrap_or(ResumePoint {
            elapsed_seconds: 0,
            battery_percent: None,
        });

    StartupState::Incomplete {
        run_id: last.run_id.clone(),
        resume_point,
    }
}

/// Reopens the incomplete run: marks it resumed and hands back the point to
/// seed the session clock and sampler baseline from. Wall-clock downtime is
/// excluded by construction — the clock restarts from the last entry's
/// elapsed seconds.
pub fn resume_run(store: &mut SessionStore, laptop_id: &str) -> Result<ResumePoint> {
    let resume_point = store
        .current_run(laptop_id)
        .map(|run| {
            run.last_entry()
                .map(|entry| ResumePoint {
                    elapsed_seconds: entry.elapsed_seconds,
                    battery_percent: Some(entry.battery_percent),
                })
                .unwrap_or(ResumePoint {
                    elapsed_seconds: 0,
                    battery_percent: None,
                })
        })
        .ok_or_else(|| TesterError::NoActiveRun(laptop_id.to_string()))?;

    store.mark_resumed(laptop_id)?;
    info!(
        laptop_id,
        elapsed_seconds = resume_point.elapsed_seconds,
        "resuming interrupted test run"
    );
    Ok(resume_point)
}

/// Finalizes the stale run so a fresh one can start. Without an explicit
/// override the status comes from the last-percent heuristic.
pub fn abandon_run(
    store: &mut SessionStore,
    laptop_id: &str,
    low_battery_threshold: u8,
    override_status: Option<RunStatus>,
    now: DateTime<Utc>,
) -> Result<RunStatus> {
    let last_percent = store
        .current_run(laptop_id)
        .and_then(|run| run.last_entry())
        .map(|entry| entry.battery_percent);

    let status =
        override_status.unwrap_or_else(|| classify_abandoned(last_percent, low_battery_threshold));
    store.finalize_run(laptop_id, status, now)?;
    info!(laptop_id, status = status.as_str(), "stale run finalized");
    Ok(status)
}

/// The next-startup heuristic: the run drained to zero before dying, hit the
/// OS low-battery cutoff, or was simply abandoned.
fn classify_abandoned(last_percent: Option<u8>, low_battery_threshold: u8) -> RunStatus {
    match last_percent {
        Some(0) => RunStatus::Completed,
        Some(percent) if percent <= low_battery_threshold => RunStatus::LowBatteryShutdown,
        _ => RunStatus::Interrupted,
    }
}
