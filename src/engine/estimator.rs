//! Mid-ride re-estimation of CP and W'
//!
//! Each time the balance falls through a new depletion milestone while the
//! rider is still above CP, CP is refitted from the above-CP history with the
//! two-parameter model and a 20-minute-test equivalent W' is derived from it.
//! Fits only ever raise an estimate.

use tracing::debug;

use crate::constants::test_protocol::{TWENTY_MINUTE_TEST_FACTOR, TWENTY_MINUTE_TEST_SECS};
use crate::models::{Joules, Watts};

/// Two-parameter CP fit: `CP = P - W'/T`, defined only when `P > W'/T`
pub fn cp_fit(avg_power: Watts, duration_secs: f64, w_prime: Joules) -> Option<Watts> {
    if duration_secs <= 0.0 {
        return None;
    }
    let implied = w_prime / duration_secs;
    if avg_power > implied {
        Some(avg_power - implied)
    } else {
        None
    }
}

/// Two-parameter W' fit: `W' = (P - CP) * T`, defined only when `P > CP`
pub fn w_prime_fit(avg_power: Watts, duration_secs: f64, critical_power: Watts) -> Option<Joules> {
    if avg_power > critical_power {
        Some((avg_power - critical_power) * duration_secs)
    } else {
        None
    }
}

/// W' implied by a 20-minute test ridden at 104.5% of CP
pub fn twenty_minute_test_w_prime(critical_power: Watts) -> Option<Joules> {
    w_prime_fit(
        TWENTY_MINUTE_TEST_FACTOR * critical_power,
        TWENTY_MINUTE_TEST_SECS,
        critical_power,
    )
}

/// Inputs to a re-estimation, read from the integrator and engine state
#[derive(Debug, Clone, Copy)]
pub struct FitInputs {
    pub avg_power_above_cp: Option<Watts>,
    pub time_above_cp_secs: f64,
    pub estimated_cp: Watts,
    pub estimated_w_prime: Joules,
}

/// What a fired milestone changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReEstimation {
    /// Milestone after this trigger
    pub next_update_level: Joules,
    /// New CP when the fit was accepted
    pub critical_power: Option<Watts>,
    /// New test-equivalent W' when it grew
    pub test_w_prime: Option<Joules>,
}

/// Milestone tracker and fit gate
#[derive(Debug, Clone)]
pub struct ReEstimator {
    enabled: bool,
    step: Joules,
    w_prime_initial: Joules,
    next_update_level: Joules,
    test_w_prime: Joules,
    modified_w_prime: Joules,
}

impl ReEstimator {
    /// Start with the first milestone at full capacity
    pub fn new(enabled: bool, step: Joules, w_prime_initial: Joules, test_w_prime: Joules) -> Self {
        ReEstimator {
            enabled,
            step,
            w_prime_initial,
            next_update_level: w_prime_initial,
            test_w_prime,
            modified_w_prime: 0.0,
        }
    }

    /// Trigger condition: actively depleting and below the next milestone
    pub fn should_fire(&self, balance: Joules, expended: Joules) -> bool {
        self.enabled && expended > 0.0 && balance < self.next_update_level
    }

    /// Fire if the milestone was crossed this sample
    pub fn evaluate(
        &mut self,
        balance: Joules,
        expended: Joules,
        inputs: &FitInputs,
    ) -> Option<ReEstimation> {
        if !self.should_fire(balance, expended) {
            return None;
        }

        self.next_update_level -= self.step;
        self.modified_w_prime = self.w_prime_initial - self.next_update_level;

        let critical_power = inputs
            .avg_power_above_cp
            .and_then(|avg| cp_fit(avg, inputs.time_above_cp_secs, inputs.estimated_w_prime))
            .filter(|&cp| cp > inputs.estimated_cp);

        match critical_power {
            Some(cp) => debug!(
                previous = inputs.estimated_cp,
                estimated_cp = cp,
                "Critical power raised by re-estimation"
            ),
            None => debug!(
                avg_power_above_cp = ?inputs.avg_power_above_cp,
                time_above_cp = inputs.time_above_cp_secs,
                "CP fit rejected, keeping estimate"
            ),
        }

        let effective_cp = critical_power.unwrap_or(inputs.estimated_cp);
        let test_w_prime =
            twenty_minute_test_w_prime(effective_cp).filter(|&w| w > self.test_w_prime);
        if let Some(w) = test_w_prime {
            self.test_w_prime = w;
        }

        debug!(
            balance,
            next_update_level = self.next_update_level,
            modified_w_prime = self.modified_w_prime,
            "Re-estimation milestone reached"
        );

        Some(ReEstimation {
            next_update_level: self.next_update_level,
            critical_power,
            test_w_prime,
        })
    }

    pub fn next_update_level(&self) -> Joules {
        self.next_update_level
    }

    pub fn test_w_prime(&self) -> Joules {
        self.test_w_prime
    }

    pub fn modified_w_prime(&self) -> Joules {
        self.modified_w_prime
    }
}
