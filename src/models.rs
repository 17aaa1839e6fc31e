use serde::{Deserialize, Serialize};

use crate::constants::{matches, re_estimation};

/// Power in watts
pub type Watts = f64;

/// Energy in joules
pub type Joules = f64;

/// Sample timestamp in milliseconds (session- or epoch-relative, only differences matter)
pub type Timestamp = u64;

/// A single reading delivered by the power-sample source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Instantaneous power; `None` when the sensor dropped the reading
    pub power: Option<Watts>,

    /// When the reading was taken
    pub timestamp: Timestamp,
}

impl PowerSample {
    pub fn new(power: Watts, timestamp: Timestamp) -> Self {
        PowerSample {
            power: Some(power),
            timestamp,
        }
    }

    /// A reading with no power value (coerced to 0 W by the engine)
    pub fn missing(timestamp: Timestamp) -> Self {
        PowerSample {
            power: None,
            timestamp,
        }
    }

    /// Power after coercing missing, negative or non-finite readings to zero
    pub fn effective_power(&self) -> Watts {
        sanitize_power(self.power.unwrap_or(0.0))
    }
}

/// Coerce a raw power reading into the model's domain (`>= 0`, finite)
pub fn sanitize_power(power: Watts) -> Watts {
    if power.is_finite() && power > 0.0 {
        power
    } else {
        0.0
    }
}

/// Thresholds defining what counts as a match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Minimum bout duration in seconds
    pub min_match_duration_secs: f64,

    /// Percentage of W' that a bout must deplete
    pub min_depletion_percent: f64,

    /// Percentage of CP that power must reach to count as effort
    pub min_power_percent: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            min_match_duration_secs: matches::DEFAULT_MIN_DURATION_SECS,
            min_depletion_percent: matches::DEFAULT_MIN_DEPLETION_PERCENT,
            min_power_percent: matches::DEFAULT_MIN_POWER_PERCENT,
        }
    }
}

/// How the below-CP average feeding tau is accumulated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BelowCpAverage {
    /// Mean of every below-CP sample since reset
    AllTime,
    /// Mean of below-CP samples within the trailing window of ride time
    Trailing { window_secs: f64 },
}

impl Default for BelowCpAverage {
    fn default() -> Self {
        BelowCpAverage::AllTime
    }
}

/// Engine tuning and feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Re-estimate CP and test W' at depletion milestones
    pub re_estimation: bool,

    /// Depletion between milestones in joules
    pub update_step: Joules,

    /// Below-CP averaging policy for tau
    pub below_cp_average: BelowCpAverage,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            re_estimation: true,
            update_step: re_estimation::DEFAULT_UPDATE_STEP,
            below_cp_average: BelowCpAverage::AllTime,
        }
    }
}
