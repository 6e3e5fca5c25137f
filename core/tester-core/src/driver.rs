//! Session driver: the top-level test state machine.
//!
//! One logical thread drives `Idle → Validating → AwaitingDischarge →
//! Monitoring → terminal`. The driver is steppable — `poll_once` advances by
//! exactly one tick against an explicit `Instant` — and the blocking `run`
//! loop adds cadence and cancellation on top, so tests never sleep.
//!
//! Poll cadence and backup cadence are two schedule checks on the same tick:
//! a failed backup never delays or skips a sampling poll, and vice versa.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::clock::SessionClock;
use crate::config::TesterConfig;
use crate::durability::Durability;
use crate::error::{Result, TesterError};
use crate::model::{BatteryHealth, LogEntry, PowerEventKind, RunStatus};
use crate::resume::ResumePoint;
use crate::sampler::{SampleBaseline, SampleCandidate};
use crate::sensor::{BatteryReading, Sensor};
use crate::store::SessionStore;
use crate::validation::validate_pretest;

/// How many consecutive sensor failures downgrade confidence in the last
/// known reading. Monitoring continues either way.
const SENSOR_FAILURE_DOWNGRADE: u32 = 3;

/// Slice length for cancellable sleeps in the blocking loop.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    Validating,
    AwaitingDischarge,
    Monitoring,
    Finished(RunStatus),
}

/// What a single `poll_once` tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not started, or still waiting for AC disconnect.
    Waiting,
    /// AC disconnect observed; monitoring begins on the next tick.
    StartedMonitoring,
    /// A monitoring tick ran; `logged` says whether an entry was appended.
    Sampled { logged: bool },
    /// The sensor read failed; the cycle was skipped.
    SensorSkipped,
    Finished(RunStatus),
}

pub struct SessionDriver<S: Sensor> {
    sensor: S,
    store: SessionStore,
    durability: Durability,
    config: TesterConfig,
    laptop_id: String,
    phase: DriverPhase,
    clock: SessionClock,
    baseline: Option<SampleBaseline>,
    charging: bool,
    low_battery_warned: bool,
    sensor_failures: u32,
    last_good_reading: Option<BatteryReading>,
}

impl<S: Sensor> SessionDriver<S> {
    pub fn new(
        sensor: S,
        store: SessionStore,
        durability: Durability,
        config: TesterConfig,
        laptop_id: impl Into<String>,
    ) -> Self {
        Self {
            sensor,
            store,
            durability,
            config,
            laptop_id: laptop_id.into(),
            phase: DriverPhase::Idle,
            clock: SessionClock::new(),
            baseline: None,
            charging: false,
            low_battery_warned: false,
            sensor_failures: 0,
            last_good_reading: None,
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Validates pre-test conditions and creates a fresh run. On a failed
    /// validation the phase stays `Validating` and the error carries the
    /// check failures; no state is mutated.
    pub fn begin_fresh(
        &mut self,
        mut metadata: std::collections::BTreeMap<String, serde_json::Value>,
        battery_health: Option<BatteryHealth>,
    ) -> Result<()> {
        self.phase = DriverPhase::Validating;

        if self.config.skip_validation {
            warn!("pre-test validation skipped; results may not be comparable");
            metadata.insert("validation_skipped".to_string(), serde_json::json!(true));
        } else {
            let reading = self.sensor.read().ok();
            let report = validate_pretest(
                reading.as_ref(),
                battery_health.as_ref(),
                self.config.require_full_charge,
            );
            for warning in &report.warnings {
                warn!(warning = %warning, "pre-test validation warning");
            }
            if !report.is_valid() {
                return Err(TesterError::ValidationFailed {
                    errors: report.errors,
                });
            }
        }

        self.store
            .start_run(&self.laptop_id, Utc::now(), metadata, battery_health)?;
        self.persist_with_retry();
        self.phase = DriverPhase::AwaitingDischarge;
        info!(laptop_id = %self.laptop_id, "test run created; waiting for AC disconnect");
        Ok(())
    }

    /// Continues an interrupted run from its resume point: the session clock
    /// restarts at the last durable entry's elapsed seconds (downtime is not
    /// counted) and the sampler baseline is re-seeded from the same entry.
    pub fn begin_resumed(&mut self, resume_point: ResumePoint) -> Result<()> {
        self.clock = SessionClock::starting_at(resume_point.elapsed_seconds);
        self.baseline = resume_point.baseline();
        self.persist_with_retry();
        self.phase = DriverPhase::AwaitingDischarge;
        info!(
            laptop_id = %self.laptop_id,
            elapsed_seconds = resume_point.elapsed_seconds,
            "resumed test run; waiting for AC disconnect"
        );
        Ok(())
    }

    /// Advances the state machine by one tick.
    pub fn poll_once(&mut self, now: Instant) -> Result<PollOutcome> {
        match self.phase {
            DriverPhase::Idle | DriverPhase::Validating => Ok(PollOutcome::Waiting),
            DriverPhase::AwaitingDischarge => self.await_tick(now),
            DriverPhase::Monitoring => self.monitor_tick(now),
            DriverPhase::Finished(status) => Ok(PollOutcome::Finished(status)),
        }
    }

    fn await_tick(&mut self, now: Instant) -> Result<PollOutcome> {
        let reading = match self.sensor.read() {
            Ok(reading) => reading,
            Err(err) => {
                debug!(error = %err, "sensor read failed while awaiting discharge");
                return Ok(PollOutcome::SensorSkipped);
            }
        };

        if reading.ac_connected || reading.charging {
            return Ok(PollOutcome::Waiting);
        }

        // On battery: start the clock reference and mark the test started.
        self.clock.tick(now);
        self.charging = false;
        self.last_good_reading = Some(reading);
        self.store.append_power_event(
            &self.laptop_id,
            Utc::now(),
            PowerEventKind::TestStarted,
            false,
            Some(reading.percent),
        )?;
        self.persist_with_retry();
        self.phase = DriverPhase::Monitoring;
        info!(percent = reading.percent, "running on battery power; monitoring started");
        Ok(PollOutcome::StartedMonitoring)
    }

    fn monitor_tick(&mut self, now: Instant) -> Result<PollOutcome> {
        let reading = match self.sensor.read() {
            Ok(reading) => {
                self.sensor_failures = 0;
                reading
            }
            Err(err) => {
                self.sensor_failures += 1;
                self.clock.tick(now);
                if self.sensor_failures == SENSOR_FAILURE_DOWNGRADE {
                    warn!(
                        error = %err,
                        failures = self.sensor_failures,
                        "repeated sensor failures; relying on last known reading"
                    );
                } else {
                    debug!(error = %err, "sensor read failed; skipping cycle");
                }
                return Ok(PollOutcome::SensorSkipped);
            }
        };
        self.last_good_reading = Some(reading);

        // A battery reporting Charging, or AC present at all, pauses the test.
        let charging = reading.charging || reading.ac_connected;
        if charging && !self.charging {
            self.charging = true;
            self.clock.pause(now);
            self.store.append_power_event(
                &self.laptop_id,
                Utc::now(),
                PowerEventKind::ChargingDetected,
                true,
                Some(reading.percent),
            )?;
            warn!(percent = reading.percent, "charger detected; elapsed clock paused");
            self.persist_with_retry();
        } else if !charging && self.charging {
            self.charging = false;
            self.clock.resume(now);
            self.store.append_power_event(
                &self.laptop_id,
                Utc::now(),
                PowerEventKind::ChargingStopped,
                false,
                Some(reading.percent),
            )?;
            // The drop trigger compares against the percent observed now,
            // not the pre-charge high-water mark.
            if let Some(baseline) = self.baseline.as_mut() {
                baseline.battery_percent = reading.percent;
            }
            info!(percent = reading.percent, "charger disconnected; elapsed clock resumed");
            self.persist_with_retry();
        }

        let elapsed = self.clock.tick(now);

        if reading.percent <= self.config.low_battery_threshold {
            if !self.low_battery_warned {
                self.low_battery_warned = true;
                self.store
                    .append_low_battery_event(&self.laptop_id, Utc::now(), reading.percent)?;
                warn!(
                    percent = reading.percent,
                    "low battery; system may shut down soon"
                );
                self.persist_with_retry();
            }
        } else {
            // Charged back above the threshold; the next crossing warns again.
            self.low_battery_warned = false;
        }

        let candidate = SampleCandidate {
            battery_percent: reading.percent,
            elapsed_seconds: elapsed,
            charging,
        };
        let logged = self.config.sampler.should_log(self.baseline, candidate);
        if logged {
            self.store.append_entry(
                &self.laptop_id,
                LogEntry {
                    timestamp: Utc::now(),
                    battery_percent: reading.percent,
                    elapsed_seconds: elapsed,
                    charging,
                },
            )?;
            self.baseline = Some(SampleBaseline {
                elapsed_seconds: elapsed,
                battery_percent: reading.percent,
            });
            self.persist_with_retry();
            info!(
                percent = reading.percent,
                elapsed_seconds = elapsed,
                "battery sample logged"
            );
        }

        // Independent backup schedule; never allowed to interfere with polls.
        if self.durability.should_backup(now) {
            if let Err(err) = self.durability.backup(now) {
                warn!(error = %err, "periodic backup failed");
            }
        }

        if reading.percent == 0 && !charging {
            self.finalize(RunStatus::Completed, now)?;
            info!("battery depleted; test complete");
            return Ok(PollOutcome::Finished(RunStatus::Completed));
        }

        Ok(PollOutcome::Sampled { logged })
    }

    /// User cancellation: finalize as `Interrupted` with a best-effort final
    /// persist before anything else happens.
    pub fn interrupt(&mut self, now: Instant) -> Result<RunStatus> {
        match self.phase {
            DriverPhase::Finished(status) => Ok(status),
            DriverPhase::Idle | DriverPhase::Validating => Ok(RunStatus::Interrupted),
            DriverPhase::AwaitingDischarge | DriverPhase::Monitoring => {
                self.finalize(RunStatus::Interrupted, now)?;
                info!("test interrupted by user");
                Ok(RunStatus::Interrupted)
            }
        }
    }

    fn finalize(&mut self, status: RunStatus, now: Instant) -> Result<()> {
        let elapsed = self.clock.tick(now);

        // Record the final reading if it never made it into the log.
        if self.phase == DriverPhase::Monitoring {
            if let Some(reading) = self.last_good_reading {
                let differs = self
                    .store
                    .current_run(&self.laptop_id)
                    .and_then(|run| run.last_entry())
                    .map(|entry| entry.battery_percent != reading.percent)
                    .unwrap_or(true);
                if differs {
                    self.store.append_entry(
                        &self.laptop_id,
                        LogEntry {
                            timestamp: Utc::now(),
                            battery_percent: reading.percent,
                            elapsed_seconds: elapsed,
                            charging: self.charging,
                        },
                    )?;
                }
            }
        }

        self.store.finalize_run(&self.laptop_id, status, Utc::now())?;

        // The persist is attempted first and allowed to fail — the process
        // may be dying.
        self.persist_with_retry();
        if let Err(err) = self.durability.backup(now) {
            warn!(error = %err, "final backup failed");
        }

        self.phase = DriverPhase::Finished(status);
        Ok(())
    }

    /// One immediate retry on a failed persist, then keep going from memory;
    /// losing persistence lag is preferable to losing a sample.
    fn persist_with_retry(&mut self) {
        if let Err(first) = self.durability.persist(self.store.document()) {
            warn!(error = %first, "persist failed; retrying once");
            if let Err(second) = self.durability.persist(self.store.document()) {
                warn!(
                    error = %second,
                    "persist retry failed; continuing with in-memory state"
                );
            }
        }
    }

    /// Blocking loop: polls at the phase's cadence until the run reaches a
    /// terminal state or `shutdown` is raised, then finalizes accordingly.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<RunStatus> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return self.interrupt(Instant::now());
            }

            match self.poll_once(Instant::now())? {
                PollOutcome::Finished(status) => return Ok(status),
                _ => {}
            }

            let interval = match self.phase {
                DriverPhase::AwaitingDischarge => self.config.await_poll_interval,
                _ => self.config.monitor_poll_interval,
            };
            if !sleep_cancellable(interval, shutdown) {
                return self.interrupt(Instant::now());
            }
        }
    }
}

/// Sleeps in short slices so an external shutdown signal cancels the wait.
/// Returns false when the shutdown flag was raised.
fn sleep_cancellable(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline.saturating_duration_since(Instant::now())));
    }
    !shutdown.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RootDocument;
    use crate::sensor::SensorError;
    use crate::storage::StorageConfig;
    use std::collections::{BTreeMap, VecDeque};
    use tempfile::TempDir;

    const LAPTOP: &str = "LAPTOP-TEST";

    struct ScriptedSensor {
        readings: VecDeque<std::result::Result<BatteryReading, SensorError>>,
    }

    impl ScriptedSensor {
        fn new(
            readings: impl IntoIterator<Item = std::result::Result<BatteryReading, SensorError>>,
        ) -> Self {
            Self {
                readings: readings.into_iter().collect(),
            }
        }
    }

    impl Sensor for ScriptedSensor {
        fn read(&mut self) -> std::result::Result<BatteryReading, SensorError> {
            self.readings
                .pop_front()
                .unwrap_or_else(|| Err(SensorError::Unavailable("script exhausted".into())))
        }
    }

    fn reading(percent: u8, charging: bool, ac: bool) -> std::result::Result<BatteryReading, SensorError> {
        Ok(BatteryReading {
            percent,
            charging,
            ac_connected: ac,
        })
    }

    fn driver_with(
        temp: &TempDir,
        sensor: ScriptedSensor,
        config: TesterConfig,
    ) -> SessionDriver<ScriptedSensor> {
        let mut store = SessionStore::new(RootDocument::new());
        store.register_laptop(LAPTOP, BTreeMap::new());
        let durability = Durability::new(
            StorageConfig::with_root(temp.path().to_path_buf()),
            config.backup_interval,
            config.keep_backups,
        );
        SessionDriver::new(sensor, store, durability, config, LAPTOP)
    }

    #[test]
    fn failed_validation_keeps_phase_validating() {
        let temp = TempDir::new().unwrap();
        // 80% and unplugged: two blocking errors.
        let sensor = ScriptedSensor::new([reading(80, false, false)]);
        let mut driver = driver_with(&temp, sensor, TesterConfig::default());

        let err = driver.begin_fresh(BTreeMap::new(), None).unwrap_err();
        assert!(matches!(err, TesterError::ValidationFailed { .. }));
        assert_eq!(driver.phase(), DriverPhase::Validating);
        assert!(driver.store().current_run(LAPTOP).is_none());
    }

    #[test]
    fn skip_validation_records_note() {
        let temp = TempDir::new().unwrap();
        let sensor = ScriptedSensor::new([]);
        let config = TesterConfig {
            skip_validation: true,
            ..TesterConfig::default()
        };
        let mut driver = driver_with(&temp, sensor, config);

        driver.begin_fresh(BTreeMap::new(), None).unwrap();
        assert_eq!(driver.phase(), DriverPhase::AwaitingDischarge);
        let run = driver.store().current_run(LAPTOP).unwrap();
        assert_eq!(run.metadata["validation_skipped"], serde_json::json!(true));
    }

    #[test]
    fn monitoring_starts_on_ac_disconnect() {
        let temp = TempDir::new().unwrap();
        let sensor = ScriptedSensor::new([
            reading(100, false, true), // validation read
            reading(100, false, true), // still plugged in
            reading(100, false, false), // unplugged
        ]);
        let mut driver = driver_with(&temp, sensor, TesterConfig::default());
        driver.begin_fresh(BTreeMap::new(), None).unwrap();

        let t0 = Instant::now();
        assert_eq!(driver.poll_once(t0).unwrap(), PollOutcome::Waiting);
        assert_eq!(
            driver.poll_once(t0 + Duration::from_secs(5)).unwrap(),
            PollOutcome::StartedMonitoring
        );
        assert_eq!(driver.phase(), DriverPhase::Monitoring);

        let run = driver.store().current_run(LAPTOP).unwrap();
        assert_eq!(run.power_events.len(), 1);
        assert_eq!(run.power_events[0].kind, PowerEventKind::TestStarted);
        assert!(!run.power_events[0].ac_connected);
    }
}
