//! Pausable session clock.
//!
//! The session clock counts monitored-on-battery time only: it stops while a
//! charger is connected and it never counts wall-clock downtime between
//! processes (a resumed run re-seeds the clock from the last durable entry).
//! Callers feed explicit `Instant`s so tests are deterministic.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SessionClock {
    base: Duration,
    accrued: Duration,
    last_tick: Option<Instant>,
    paused: bool,
}

impl SessionClock {
    /// A clock starting from zero; used for fresh runs.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock seeded with already-recorded elapsed seconds; used on resume.
    pub fn starting_at(base_secs: u64) -> Self {
        Self {
            base: Duration::from_secs(base_secs),
            accrued: Duration::ZERO,
            last_tick: None,
            paused: false,
        }
    }

    /// Advances the clock to `now` and returns total elapsed seconds.
    /// While paused the tick moves the reference point without accruing.
    pub fn tick(&mut self, now: Instant) -> u64 {
        if let Some(last) = self.last_tick {
            if !self.paused {
                self.accrued += now.saturating_duration_since(last);
            }
        }
        self.last_tick = Some(now);
        self.elapsed_seconds()
    }

    /// Stops accrual. Time up to `now` still counts.
    pub fn pause(&mut self, now: Instant) {
        if !self.paused {
            self.tick(now);
            self.paused = true;
        }
    }

    /// Restarts accrual from `now`.
    pub fn resume(&mut self, now: Instant) {
        if self.paused {
            self.last_tick = Some(now);
            self.paused = false;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn elapsed_seconds(&self) -> u64 {
        (self.base + self.accrued).as_secs()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrues_between_ticks() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.tick(t0);
        assert_eq!(clock.tick(t0 + Duration::from_secs(10)), 10);
        assert_eq!(clock.tick(t0 + Duration::from_secs(25)), 25);
    }

    #[test]
    fn pause_stops_accrual() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.tick(t0);
        clock.pause(t0 + Duration::from_secs(10));
        // Five minutes on the charger.
        assert_eq!(clock.tick(t0 + Duration::from_secs(310)), 10);
        clock.resume(t0 + Duration::from_secs(310));
        assert_eq!(clock.tick(t0 + Duration::from_secs(320)), 20);
    }

    #[test]
    fn base_seeds_resumed_sessions() {
        let t0 = Instant::now();
        let mut clock = SessionClock::starting_at(600);
        clock.tick(t0);
        assert_eq!(clock.elapsed_seconds(), 600);
        assert_eq!(clock.tick(t0 + Duration::from_secs(30)), 630);
    }

    #[test]
    fn elapsed_is_monotonic_across_pause_cycles() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.tick(t0);
        let mut last = 0;
        for (offset, pause) in [(5, false), (10, true), (60, true), (70, false), (90, false)] {
            let now = t0 + Duration::from_secs(offset);
            if pause {
                clock.pause(now);
            } else {
                clock.resume(now);
            }
            let elapsed = clock.tick(now);
            assert!(elapsed >= last);
            last = elapsed;
        }
    }

    #[test]
    fn double_pause_and_resume_are_idempotent() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.tick(t0);
        clock.pause(t0 + Duration::from_secs(10));
        clock.pause(t0 + Duration::from_secs(20));
        clock.resume(t0 + Duration::from_secs(30));
        clock.resume(t0 + Duration::from_secs(40));
        assert_eq!(clock.tick(t0 + Duration::from_secs(35)), 15);
    }
}
