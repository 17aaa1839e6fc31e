//! Thread-safe engine handle
//!
//! One writer (the sample pipeline) and many readers (output channels).
//! Writers take the lock exclusively; readers copy a snapshot out under the
//! read lock so they never observe a half-applied update.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::engine::{Engine, EngineSnapshot};
use crate::models::{EngineOptions, Joules, MatchConfig, PowerSample, Timestamp, Watts};

#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<RwLock<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        SharedEngine {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    // Engine state is plain data, so a panic in another holder leaves it usable.
    fn read(&self) -> RwLockReadGuard<'_, Engine> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Engine> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, power: Watts, now: Timestamp) -> Joules {
        self.write().update(power, now)
    }

    pub fn update_sample(&self, sample: &PowerSample) -> Joules {
        self.write().update_sample(sample)
    }

    pub fn reset(&self, now: Timestamp) {
        self.write().reset(now);
    }

    pub fn reconfigure(&self, new_cp: Watts, new_w_prime: Joules, now: Timestamp) {
        self.write().reconfigure(new_cp, new_w_prime, now);
    }

    pub fn set_match_config(&self, match_config: MatchConfig, now: Timestamp) {
        self.write().set_match_config(match_config, now);
    }

    pub fn set_options(&self, options: EngineOptions, now: Timestamp) {
        self.write().set_options(options, now);
    }

    /// Consistent copy of every output
    pub fn snapshot(&self) -> EngineSnapshot {
        self.read().snapshot()
    }

    pub fn current_balance(&self) -> Joules {
        self.read().current_balance()
    }

    pub fn matches_count(&self) -> u32 {
        self.read().matches_count()
    }

    pub fn in_effort_block(&self) -> bool {
        self.read().in_effort_block()
    }

    pub fn maximal_power_available(&self) -> Watts {
        self.read().maximal_power_available()
    }

    pub fn time_to_exhaustion(&self, sustained_power: Watts) -> Option<Duration> {
        self.read().time_to_exhaustion(sustained_power)
    }
}

impl From<Engine> for SharedEngine {
    fn from(engine: Engine) -> Self {
        SharedEngine::new(engine)
    }
}
