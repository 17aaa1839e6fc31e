//! Physiological constants for the W' balance model
//!
//! Values follow the Skiba differential W' balance model and the two-parameter
//! critical power relationship `P = CP + W'/t`.
//!
//! References:
//! - Skiba, P.F. et al. (2012). Modeling the expenditure and reconstitution of work capacity
//!   above critical power. Med Sci Sports Exerc 44(8).
//! - Monod, H. & Scherrer, J. (1965). The work capacity of a synergic muscular group.

/// Critical power limits
pub mod critical_power {
    /// Lowest critical power the model accepts (watts).
    /// Smaller values are raised to this floor at construction.
    pub const MIN_CRITICAL_POWER: f64 = 100.0;
}

/// 20-minute test equivalence used to floor W' and to report a test-derived W'
pub mod test_protocol {
    /// A 20-minute test is ridden at this multiple of CP
    pub const TWENTY_MINUTE_TEST_FACTOR: f64 = 1.045;

    /// Duration of the reference test (seconds)
    pub const TWENTY_MINUTE_TEST_SECS: f64 = 1200.0;
}

/// Reconstitution time constant: `tau = A * exp(-B * (CP - P_below)) + C`
///
/// Reference: Skiba et al. (2012), equation 3.
pub mod tau {
    pub const AMPLITUDE_SECS: f64 = 546.0;
    pub const DECAY_PER_WATT: f64 = 0.01;
    pub const OFFSET_SECS: f64 = 316.0;
}

/// Defaults for mid-ride re-estimation
pub mod re_estimation {
    /// Depletion step between re-estimation milestones (joules)
    pub const DEFAULT_UPDATE_STEP: f64 = 1000.0;
}

/// Default thresholds defining a "match"
pub mod matches {
    /// Minimum bout length (seconds)
    pub const DEFAULT_MIN_DURATION_SECS: f64 = 30.0;

    /// Power must reach this percentage of CP to count as effort
    pub const DEFAULT_MIN_POWER_PERCENT: f64 = 120.0;

    /// Bout must deplete at least this percentage of W'
    pub const DEFAULT_MIN_DEPLETION_PERCENT: f64 = 5.0;
}
