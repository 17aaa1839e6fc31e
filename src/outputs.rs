//! Named output channels and end-of-session summary
//!
//! Each channel is a single number derived from an [`EngineSnapshot`], suitable
//! for a gauge or a broadcast data field.

use serde::{Deserialize, Serialize};

use crate::engine::EngineSnapshot;
use crate::models::{Joules, Watts};

/// A numeric value published once per second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum OutputChannel {
    Balance,
    PercentBalance,
    TimeToExhaustion { power: Watts },
    MatchCount,
    MaximalPowerAvailable,
    LastMatchDuration,
    LastMatchEnergy,
    EstimatedCp,
    EstimatedWPrime,
}

impl OutputChannel {
    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            OutputChannel::Balance => "W' bal (J)",
            OutputChannel::PercentBalance => "W' bal (%)",
            OutputChannel::TimeToExhaustion { .. } => "TTE (s)",
            OutputChannel::MatchCount => "Matches",
            OutputChannel::MaximalPowerAvailable => "MPA (W)",
            OutputChannel::LastMatchDuration => "Last match (s)",
            OutputChannel::LastMatchEnergy => "Last match (J)",
            OutputChannel::EstimatedCp => "CP (W)",
            OutputChannel::EstimatedWPrime => "W' test (J)",
        }
    }

    /// Current value; `None` for an unbounded time to exhaustion
    pub fn value(&self, snapshot: &EngineSnapshot) -> Option<f64> {
        match self {
            OutputChannel::Balance => Some(snapshot.balance),
            OutputChannel::PercentBalance => Some(snapshot.percent_balance),
            OutputChannel::TimeToExhaustion { power } => snapshot
                .time_to_exhaustion(*power)
                .map(|tte| tte.as_secs_f64()),
            OutputChannel::MatchCount => Some(snapshot.match_count as f64),
            OutputChannel::MaximalPowerAvailable => Some(snapshot.maximal_power_available),
            OutputChannel::LastMatchDuration => {
                Some(snapshot.last_match.map(|m| m.duration_secs).unwrap_or(0.0))
            }
            OutputChannel::LastMatchEnergy => {
                Some(snapshot.last_match.map(|m| m.energy).unwrap_or(0.0))
            }
            OutputChannel::EstimatedCp => Some(snapshot.estimated_cp),
            OutputChannel::EstimatedWPrime => Some(snapshot.test_w_prime),
        }
    }

    /// The standard set of channels, projecting TTE at `tte_power`
    pub fn standard(tte_power: Watts) -> Vec<OutputChannel> {
        vec![
            OutputChannel::Balance,
            OutputChannel::PercentBalance,
            OutputChannel::TimeToExhaustion { power: tte_power },
            OutputChannel::MatchCount,
            OutputChannel::MaximalPowerAvailable,
            OutputChannel::LastMatchDuration,
            OutputChannel::LastMatchEnergy,
        ]
    }
}

/// Estimates that grew beyond their configured values during the ride
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewEstimate {
    /// New CP when it grew
    pub critical_power: Option<Watts>,
    /// New test W' when it grew
    pub w_prime: Option<Joules>,
}

/// End-of-ride values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: uuid::Uuid,
    pub elapsed_secs: f64,
    pub final_balance: Joules,
    pub min_balance: Joules,
    pub match_count: u32,
    pub initial_cp: Watts,
    pub estimated_cp: Watts,
    pub initial_w_prime: Joules,
    pub test_w_prime: Joules,
}

impl SessionSummary {
    pub fn from_snapshot(snapshot: &EngineSnapshot) -> Self {
        SessionSummary {
            session_id: uuid::Uuid::new_v4(),
            elapsed_secs: snapshot.elapsed_secs,
            final_balance: snapshot.balance,
            min_balance: snapshot.min_balance,
            match_count: snapshot.match_count,
            initial_cp: snapshot.initial_cp,
            estimated_cp: snapshot.estimated_cp,
            initial_w_prime: snapshot.initial_w_prime,
            test_w_prime: snapshot.test_w_prime,
        }
    }

    /// One-shot notification payload when CP or W' was exceeded
    pub fn new_estimate(&self) -> Option<NewEstimate> {
        let critical_power = (self.estimated_cp > self.initial_cp).then_some(self.estimated_cp);
        let w_prime = (self.test_w_prime > self.initial_w_prime).then_some(self.test_w_prime);

        if critical_power.is_none() && w_prime.is_none() {
            None
        } else {
            Some(NewEstimate {
                critical_power,
                w_prime,
            })
        }
    }

    /// Notification text for a new estimate
    pub fn notification(&self) -> Option<String> {
        let estimate = self.new_estimate()?;
        let mut parts = Vec::new();
        if let Some(cp) = estimate.critical_power {
            parts.push(format!("CP {:.0} W (was {:.0} W)", cp, self.initial_cp));
        }
        if let Some(w) = estimate.w_prime {
            parts.push(format!("W' {:.0} J (was {:.0} J)", w, self.initial_w_prime));
        }
        Some(format!("New estimate: {}", parts.join(", ")))
    }
}
