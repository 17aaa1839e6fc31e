//! Balance integrator
//!
//! Discretised Skiba W' balance integral:
//!
//! ```text
//! S_n   = S_{n-1} + (P_n - CP)+ * dt_n * exp(r_n / tau)
//! W'bal = W' - S_n * exp(-r_n / tau)
//! ```
//!
//! `tau` depends on the rider's typical below-CP power. The discount clock `r`
//! runs only while the rider is at or below CP, so the balance strictly falls
//! above CP and strictly recovers below it. The integrator carries the deficit
//! `S * exp(-r / tau)` rather than `S` itself, which keeps the balance
//! continuous when re-estimation moves CP (and with it tau) and cannot
//! overflow on long rides.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::constants::tau as tau_coeff;
use crate::models::{BelowCpAverage, Joules, Watts};

/// Count/sum pair for an all-time arithmetic mean
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMean {
    count: u64,
    sum: f64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of all pushed values, `None` before the first
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Below-CP power history under the configured averaging policy
#[derive(Debug, Clone)]
pub struct BelowCpHistory {
    policy: BelowCpAverage,
    all_time: RunningMean,
    /// (elapsed seconds, power) pairs for the trailing policy
    window: VecDeque<(f64, Watts)>,
    window_sum: f64,
}

impl BelowCpHistory {
    pub fn new(policy: BelowCpAverage) -> Self {
        BelowCpHistory {
            policy,
            all_time: RunningMean::default(),
            window: VecDeque::new(),
            window_sum: 0.0,
        }
    }

    pub fn push(&mut self, elapsed_secs: f64, power: Watts) {
        self.all_time.push(power);

        if let BelowCpAverage::Trailing { .. } = self.policy {
            self.window.push_back((elapsed_secs, power));
            self.window_sum += power;
            self.advance(elapsed_secs);
        }
    }

    /// Drop trailing-window samples that are older than the window at `elapsed_secs`
    pub fn advance(&mut self, elapsed_secs: f64) {
        if let BelowCpAverage::Trailing { window_secs } = self.policy {
            self.evict(elapsed_secs - window_secs);
        }
    }

    fn evict(&mut self, cutoff_secs: f64) {
        while let Some(&(at, power)) = self.window.front() {
            if at >= cutoff_secs {
                break;
            }
            self.window.pop_front();
            self.window_sum -= power;
        }
        if self.window.is_empty() {
            self.window_sum = 0.0;
        }
    }

    /// All-time count/sum, independent of the policy
    pub fn all_time(&self) -> RunningMean {
        self.all_time
    }

    /// Average below-CP power feeding tau; 0 W before any below-CP sample
    pub fn average(&self) -> Watts {
        match self.policy {
            BelowCpAverage::AllTime => self.all_time.mean().unwrap_or(0.0),
            BelowCpAverage::Trailing { .. } => {
                if self.window.is_empty() {
                    0.0
                } else {
                    self.window_sum / self.window.len() as f64
                }
            }
        }
    }
}

/// Reconstitution time constant in seconds for a CP and below-CP average
pub fn tau(critical_power: Watts, avg_power_below_cp: Watts) -> f64 {
    tau_coeff::AMPLITUDE_SECS
        * (-tau_coeff::DECAY_PER_WATT * (critical_power - avg_power_below_cp)).exp()
        + tau_coeff::OFFSET_SECS
}

/// Outcome of one integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationStep {
    /// Seconds integrated in this step
    pub dt: f64,
    /// `max(0, P - CP)`
    pub power_above_cp: Watts,
    /// Energy drawn from W' in this step (`power_above_cp * dt`)
    pub expended: Joules,
    /// Balance after the step, whole joules
    pub balance: Joules,
    /// Time constant used for the step
    pub tau: f64,
}

/// Running totals of the exponential-kernel integral
#[derive(Debug, Clone)]
pub struct Integrator {
    elapsed_secs: f64,
    /// Weighted expenditure discounted to the present, `S * exp(-r / tau)`
    deficit: Joules,
    /// Balance reported by the last step
    balance: Option<Joules>,
    below_cp: BelowCpHistory,
    above_cp: RunningMean,
    time_above_cp_secs: f64,
}

impl Integrator {
    pub fn new(policy: BelowCpAverage) -> Self {
        Integrator {
            elapsed_secs: 0.0,
            deficit: 0.0,
            balance: None,
            below_cp: BelowCpHistory::new(policy),
            above_cp: RunningMean::default(),
            time_above_cp_secs: 0.0,
        }
    }

    /// Advance the integral by `dt` seconds at `power`.
    ///
    /// `power` must already be sanitised. A zero `dt` is a no-op that
    /// reports the previous balance unchanged.
    pub fn step(
        &mut self,
        power: Watts,
        dt: f64,
        critical_power: Watts,
        w_prime: Joules,
    ) -> IntegrationStep {
        if dt <= 0.0 {
            return IntegrationStep {
                dt: 0.0,
                power_above_cp: 0.0,
                expended: 0.0,
                balance: self.balance(w_prime),
                tau: self.tau(critical_power),
            };
        }

        self.elapsed_secs += dt;
        self.below_cp.advance(self.elapsed_secs);
        let tau = self.tau(critical_power);

        let power_above_cp = (power - critical_power).max(0.0);
        let expended = power_above_cp * dt;
        if expended > 0.0 {
            self.deficit += expended;
        } else {
            self.deficit *= (-dt / tau).exp();
        }
        let balance = (w_prime - self.deficit).round();
        self.balance = Some(balance);

        if power_above_cp > 0.0 {
            self.above_cp.push(power);
            self.time_above_cp_secs += dt;
        } else if power < critical_power {
            self.below_cp.push(self.elapsed_secs, power);
        }

        IntegrationStep {
            dt,
            power_above_cp,
            expended,
            balance,
            tau,
        }
    }

    /// Last stepped balance, or full `w_prime` before any interval
    fn balance(&self, w_prime: Joules) -> Joules {
        self.balance.unwrap_or_else(|| w_prime.round())
    }

    /// Current time constant for the given CP
    pub fn tau(&self, critical_power: Watts) -> f64 {
        tau(critical_power, self.below_cp.average())
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn avg_power_below_cp(&self) -> Watts {
        self.below_cp.average()
    }

    pub fn below_cp(&self) -> RunningMean {
        self.below_cp.all_time()
    }

    pub fn above_cp(&self) -> RunningMean {
        self.above_cp
    }

    /// Mean raw power of samples ridden above CP
    pub fn avg_power_above_cp(&self) -> Option<Watts> {
        self.above_cp.mean()
    }

    pub fn time_above_cp_secs(&self) -> f64 {
        self.time_above_cp_secs
    }
}
