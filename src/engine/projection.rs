//! Projections from the current balance

use std::time::Duration;

use crate::models::{Joules, Watts};

/// Time until balance reaches zero at a constant `sustained_power`.
///
/// Linear first-order projection that ignores reconstitution. `None` means
/// unbounded (power at or below CP). A non-positive balance projects to zero.
pub fn time_to_exhaustion(
    balance: Joules,
    estimated_cp: Watts,
    sustained_power: Watts,
) -> Option<Duration> {
    if sustained_power.is_nan() || sustained_power <= estimated_cp {
        return None;
    }
    let secs = balance.max(0.0) / (sustained_power - estimated_cp);
    Duration::try_from_secs_f64(secs).ok()
}

/// Maximal power available: CP plus the power that would spend the current
/// balance over one reconstitution time constant.
pub fn maximal_power_available(balance: Joules, estimated_cp: Watts, tau: f64) -> Watts {
    if tau <= 0.0 {
        return estimated_cp;
    }
    estimated_cp + balance.max(0.0) / tau
}
