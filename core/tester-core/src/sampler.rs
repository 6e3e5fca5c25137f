//! Dual-trigger sampling policy.
//!
//! A poll becomes a log entry when either trigger fires: enough monitored
//! time has passed since the last entry, or the battery dropped far enough
//! while discharging. The decision is pure; the driver owns the baseline and
//! resets its percent side after a charging interval so a charge bump never
//! arms a stale high-water mark.

use serde::{Deserialize, Serialize};

/// The comparison point for sampling decisions: the last logged entry,
/// except that `battery_percent` is re-seeded to the last observed percent
/// when charging stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleBaseline {
    pub elapsed_seconds: u64,
    pub battery_percent: u8,
}

/// A candidate reading taken on the current poll.
#[derive(Debug, Clone, Copy)]
pub struct SampleCandidate {
    pub battery_percent: u8,
    pub elapsed_seconds: u64,
    pub charging: bool,
}

/// OR-combined time/percent-drop trigger. Advisory only: the driver still
/// applies charging and low-battery policy before appending.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    time_threshold_secs: u64,
    drop_threshold_pct: u8,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            time_threshold_secs: 60,
            drop_threshold_pct: 10,
        }
    }
}

impl Sampler {
    pub fn new(time_threshold_secs: u64, drop_threshold_pct: u8) -> Self {
        Self {
            time_threshold_secs,
            drop_threshold_pct,
        }
    }

    /// Whether the candidate should be recorded. Never fails.
    pub fn should_log(
        &self,
        previous: Option<SampleBaseline>,
        candidate: SampleCandidate,
    ) -> bool {
        let Some(previous) = previous else {
            return true;
        };

        if candidate
            .elapsed_seconds
            .saturating_sub(previous.elapsed_seconds)
            >= self.time_threshold_secs
        {
            return true;
        }

        // The drop trigger only counts while discharging; a rise during
        // charging must never fire it.
        if !candidate.charging
            && previous
                .battery_percent
                .saturating_sub(candidate.battery_percent)
                >= self.drop_threshold_pct
        {
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(percent: u8, elapsed: u64) -> SampleCandidate {
        SampleCandidate {
            battery_percent: percent,
            elapsed_seconds: elapsed,
            charging: false,
        }
    }

    #[test]
    fn first_sample_always_logs() {
        let sampler = Sampler::default();
        assert!(sampler.should_log(None, candidate(100, 0)));
    }

    #[test]
    fn time_trigger_fires_at_sixty_seconds() {
        let sampler = Sampler::default();
        let baseline = SampleBaseline {
            elapsed_seconds: 0,
            battery_percent: 100,
        };
        assert!(!sampler.should_log(Some(baseline), candidate(99, 59)));
        assert!(sampler.should_log(Some(baseline), candidate(99, 60)));
        assert!(sampler.should_log(Some(baseline), candidate(99, 65)));
    }

    #[test]
    fn drop_trigger_fires_at_ten_points() {
        let sampler = Sampler::default();
        let baseline = SampleBaseline {
            elapsed_seconds: 0,
            battery_percent: 95,
        };
        assert!(!sampler.should_log(Some(baseline), candidate(86, 30)));
        assert!(sampler.should_log(Some(baseline), candidate(85, 30)));
    }

    #[test]
    fn drop_trigger_suppressed_while_charging() {
        let sampler = Sampler::default();
        let baseline = SampleBaseline {
            elapsed_seconds: 0,
            battery_percent: 95,
        };
        let charging = SampleCandidate {
            battery_percent: 80,
            elapsed_seconds: 30,
            charging: true,
        };
        assert!(!sampler.should_log(Some(baseline), charging));
    }

    #[test]
    fn rise_while_charging_never_triggers() {
        let sampler = Sampler::default();
        let baseline = SampleBaseline {
            elapsed_seconds: 0,
            battery_percent: 60,
        };
        let rising = SampleCandidate {
            battery_percent: 62,
            elapsed_seconds: 30,
            charging: true,
        };
        assert!(!sampler.should_log(Some(baseline), rising));
    }

    #[test]
    fn spec_sequence_logs_on_first_and_sixty_second_gap() {
        // Samples at t=0 (100%) and t=65 (99%): both logged.
        let sampler = Sampler::default();
        assert!(sampler.should_log(None, candidate(100, 0)));
        let baseline = SampleBaseline {
            elapsed_seconds: 0,
            battery_percent: 100,
        };
        assert!(sampler.should_log(Some(baseline), candidate(99, 65)));
    }
}
