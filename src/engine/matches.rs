//! Match ("burned match") detection
//!
//! A bout starts on the first sample at or above `min_power_percent` of CP and
//! ends on the first sample below it. Only bouts that last long enough and
//! deplete enough of W' are counted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Joules, MatchConfig, Timestamp, Watts};

/// A committed match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub started_at: Timestamp,
    pub duration_secs: f64,
    /// Above-CP energy spent during the bout
    pub energy: Joules,
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq)]
enum MatchState {
    Idle,
    InMatch { started_at: Timestamp, energy: Joules },
}

/// Per-sample inputs to the detector
#[derive(Debug, Clone, Copy)]
pub struct MatchInput {
    pub power: Watts,
    pub now: Timestamp,
    pub dt: f64,
    pub estimated_cp: Watts,
    pub estimated_w_prime: Joules,
}

#[derive(Debug, Clone)]
pub struct MatchDetector {
    config: MatchConfig,
    state: MatchState,
    count: u32,
    last: Option<MatchSummary>,
}

impl MatchDetector {
    pub fn new(config: MatchConfig) -> Self {
        MatchDetector {
            config,
            state: MatchState::Idle,
            count: 0,
            last: None,
        }
    }

    fn is_effort(&self, power: Watts, estimated_cp: Watts) -> bool {
        power >= self.config.min_power_percent * estimated_cp / 100.0
    }

    /// Feed one sample; returns the match committed by this sample, if any
    pub fn observe(&mut self, input: &MatchInput) -> Option<MatchSummary> {
        let effort = self.is_effort(input.power, input.estimated_cp);

        match (self.state, effort) {
            (MatchState::Idle, true) => {
                self.state = MatchState::InMatch {
                    started_at: input.now,
                    energy: 0.0,
                };
                None
            }
            (MatchState::Idle, false) => None,
            (MatchState::InMatch { started_at, energy }, true) => {
                let above = (input.power - input.estimated_cp).max(0.0);
                self.state = MatchState::InMatch {
                    started_at,
                    energy: energy + above * input.dt,
                };
                None
            }
            (MatchState::InMatch { started_at, energy }, false) => {
                self.state = MatchState::Idle;
                self.close(started_at, energy, input)
            }
        }
    }

    fn close(
        &mut self,
        started_at: Timestamp,
        energy: Joules,
        input: &MatchInput,
    ) -> Option<MatchSummary> {
        let duration_secs = input.now.saturating_sub(started_at) as f64 / 1000.0;
        let min_energy = self.config.min_depletion_percent * input.estimated_w_prime / 100.0;

        if duration_secs >= self.config.min_match_duration_secs && energy >= min_energy {
            let summary = MatchSummary {
                started_at,
                duration_secs,
                energy,
            };
            self.count += 1;
            self.last = Some(summary);
            debug!(
                count = self.count,
                duration_secs,
                energy,
                "Match committed"
            );
            Some(summary)
        } else {
            debug!(duration_secs, energy, min_energy, "Effort too small for a match");
            None
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn in_match(&self) -> bool {
        matches!(self.state, MatchState::InMatch { .. })
    }

    /// Energy spent so far in the open bout
    pub fn current_energy(&self) -> Joules {
        match self.state {
            MatchState::InMatch { energy, .. } => energy,
            MatchState::Idle => 0.0,
        }
    }

    pub fn current_start(&self) -> Option<Timestamp> {
        match self.state {
            MatchState::InMatch { started_at, .. } => Some(started_at),
            MatchState::Idle => None,
        }
    }

    pub fn last(&self) -> Option<MatchSummary> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchConfig {
        MatchConfig {
            min_match_duration_secs: 30.0,
            min_depletion_percent: 5.0,
            min_power_percent: 120.0,
        }
    }

    fn sample(power: Watts, second: u64) -> MatchInput {
        MatchInput {
            power,
            now: second * 1000,
            dt: 1.0,
            estimated_cp: 200.0,
            estimated_w_prime: 20000.0,
        }
    }

    fn ride(detector: &mut MatchDetector, power: Watts, from: u64, seconds: u64) -> u64 {
        for second in from..from + seconds {
            detector.observe(&sample(power, second));
        }
        from + seconds
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut detector = MatchDetector::new(config());
        detector.observe(&sample(239.0, 1));
        assert!(!detector.in_match());
        detector.observe(&sample(240.0, 2));
        assert!(detector.in_match());
        assert_eq!(detector.current_start(), Some(2000));
    }

    #[test]
    fn test_committed_match() {
        let mut detector = MatchDetector::new(config());
        let next = ride(&mut detector, 260.0, 1, 40);
        assert!(detector.in_match());
        assert_eq!(detector.current_energy(), 39.0 * 60.0);

        let committed = detector.observe(&sample(100.0, next)).unwrap();
        assert_eq!(committed.duration_secs, 40.0);
        assert_eq!(committed.energy, 2340.0);
        assert_eq!(detector.count(), 1);
        assert!(!detector.in_match());
        assert_eq!(detector.last(), Some(committed));
    }

    #[test]
    fn test_short_bout_discarded() {
        let mut detector = MatchDetector::new(config());
        let next = ride(&mut detector, 400.0, 1, 20);
        assert!(detector.observe(&sample(100.0, next)).is_none());
        assert_eq!(detector.count(), 0);
        assert_eq!(detector.last(), None);
    }

    #[test]
    fn test_shallow_bout_discarded() {
        let mut detector = MatchDetector::new(config());
        // 245 W is effort, but 39 s * 45 W = 1755 J < 5% of 40 kJ
        for second in 1..=40 {
            detector.observe(&MatchInput {
                estimated_w_prime: 40000.0,
                ..sample(245.0, second)
            });
        }
        let closed = detector.observe(&MatchInput {
            estimated_w_prime: 40000.0,
            ..sample(100.0, 41)
        });
        assert!(closed.is_none());
        assert_eq!(detector.count(), 0);
    }

    #[test]
    fn test_discarded_bout_keeps_previous_match() {
        let mut detector = MatchDetector::new(config());
        let next = ride(&mut detector, 260.0, 1, 40);
        let next = ride(&mut detector, 100.0, next, 5);
        let first = detector.last();

        let next = ride(&mut detector, 300.0, next, 5);
        ride(&mut detector, 100.0, next, 1);

        assert_eq!(detector.count(), 1);
        assert_eq!(detector.last(), first);
    }
}
