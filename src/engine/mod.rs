//! W' balance engine
//!
//! [`Engine`] owns all per-ride state and is mutated only through
//! [`Engine::update`], [`Engine::reset`] and the reconfiguration calls. Every
//! sample runs the integrator, then the re-estimation milestone check, then the
//! match detector.

pub mod estimator;
pub mod integrator;
pub mod matches;
pub mod projection;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::critical_power::MIN_CRITICAL_POWER;
use crate::models::{sanitize_power, EngineOptions, Joules, MatchConfig, PowerSample, Timestamp, Watts};

use estimator::{twenty_minute_test_w_prime, FitInputs, ReEstimation, ReEstimator};
use integrator::{IntegrationStep, Integrator};
use matches::{MatchDetector, MatchInput, MatchSummary};

/// Starting parameters after the physiological floors are applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constrained {
    pub critical_power: Watts,
    pub w_prime: Joules,
    /// 20-minute test W' at the constrained CP
    pub test_w_prime: Joules,
}

/// Raise CP to the 100 W floor and W' to the 20-minute-test minimum for that CP
pub fn apply_constraints(critical_power: Watts, w_prime: Joules) -> Constrained {
    let critical_power = if critical_power.is_finite() {
        critical_power.max(MIN_CRITICAL_POWER)
    } else {
        MIN_CRITICAL_POWER
    };
    let test_w_prime = twenty_minute_test_w_prime(critical_power).unwrap_or(0.0);
    let w_prime = if w_prime.is_finite() {
        w_prime.max(test_w_prime)
    } else {
        test_w_prime
    };

    Constrained {
        critical_power,
        w_prime,
        test_w_prime,
    }
}

/// Everything that changes during a ride
#[derive(Debug, Clone)]
struct EngineState {
    critical_power_initial: Watts,
    w_prime_initial: Joules,
    estimated_cp: Watts,
    estimated_w_prime: Joules,
    balance: Joules,
    min_balance: Joules,
    session_start: Timestamp,
    last_sample_time: Option<Timestamp>,
    integrator: Integrator,
    estimator: ReEstimator,
    matches: MatchDetector,
}

impl EngineState {
    fn new(
        critical_power: Watts,
        w_prime: Joules,
        options: &EngineOptions,
        match_config: MatchConfig,
        now: Timestamp,
    ) -> Self {
        let constrained = apply_constraints(critical_power, w_prime);

        if constrained.critical_power != critical_power || constrained.w_prime != w_prime {
            info!(
                requested_cp = critical_power,
                requested_w_prime = w_prime,
                critical_power = constrained.critical_power,
                w_prime = constrained.w_prime,
                "Configuration raised to physiological floor"
            );
        }

        EngineState {
            critical_power_initial: constrained.critical_power,
            w_prime_initial: constrained.w_prime,
            estimated_cp: constrained.critical_power,
            estimated_w_prime: constrained.w_prime,
            balance: constrained.w_prime,
            min_balance: constrained.w_prime,
            session_start: now,
            last_sample_time: None,
            integrator: Integrator::new(options.below_cp_average),
            estimator: ReEstimator::new(
                options.re_estimation,
                options.update_step,
                constrained.w_prime,
                constrained.test_w_prime,
            ),
            matches: MatchDetector::new(match_config),
        }
    }
}

/// Point-in-time copy of every engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub session_start: Timestamp,
    pub last_sample_time: Option<Timestamp>,
    pub elapsed_secs: f64,
    pub balance: Joules,
    pub percent_balance: f64,
    pub min_balance: Joules,
    pub initial_cp: Watts,
    pub initial_w_prime: Joules,
    pub estimated_cp: Watts,
    pub estimated_w_prime: Joules,
    pub test_w_prime: Joules,
    pub modified_w_prime: Joules,
    pub next_update_level: Joules,
    pub tau: f64,
    pub maximal_power_available: Watts,
    pub match_count: u32,
    pub in_effort_block: bool,
    pub current_match_energy: Joules,
    pub last_match: Option<MatchSummary>,
}

impl EngineSnapshot {
    pub fn time_to_exhaustion(&self, sustained_power: Watts) -> Option<Duration> {
        projection::time_to_exhaustion(self.balance, self.estimated_cp, sustained_power)
    }
}

/// Real-time W' balance engine
#[derive(Debug, Clone)]
pub struct Engine {
    options: EngineOptions,
    match_config: MatchConfig,
    configured_cp: Watts,
    configured_w_prime: Joules,
    state: EngineState,
}

impl Engine {
    /// Create an engine with default options and match thresholds
    pub fn new(initial_cp: Watts, initial_w_prime: Joules, now: Timestamp) -> Self {
        Self::with_options(
            initial_cp,
            initial_w_prime,
            MatchConfig::default(),
            EngineOptions::default(),
            now,
        )
    }

    pub fn with_options(
        initial_cp: Watts,
        initial_w_prime: Joules,
        match_config: MatchConfig,
        options: EngineOptions,
        now: Timestamp,
    ) -> Self {
        let state = EngineState::new(initial_cp, initial_w_prime, &options, match_config, now);
        info!(
            critical_power = state.critical_power_initial,
            w_prime = state.w_prime_initial,
            "Balance engine created"
        );

        Engine {
            options,
            match_config,
            configured_cp: initial_cp,
            configured_w_prime: initial_w_prime,
            state,
        }
    }

    /// Start a new ride with the configured parameters
    pub fn reset(&mut self, now: Timestamp) {
        self.state = EngineState::new(
            self.configured_cp,
            self.configured_w_prime,
            &self.options,
            self.match_config,
            now,
        );
        info!(
            critical_power = self.state.critical_power_initial,
            w_prime = self.state.w_prime_initial,
            "Balance engine reset"
        );
    }

    /// Replace the initial CP and W'; resets the ride
    pub fn reconfigure(&mut self, new_cp: Watts, new_w_prime: Joules, now: Timestamp) {
        self.configured_cp = new_cp;
        self.configured_w_prime = new_w_prime;
        self.reset(now);
    }

    /// Replace the match thresholds; resets the ride
    pub fn set_match_config(&mut self, match_config: MatchConfig, now: Timestamp) {
        self.match_config = match_config;
        self.reset(now);
    }

    /// Replace tuning and feature toggles; resets the ride
    pub fn set_options(&mut self, options: EngineOptions, now: Timestamp) {
        self.options = options;
        self.reset(now);
    }

    /// Process one power reading and return the new balance
    pub fn update(&mut self, power: Watts, now: Timestamp) -> Joules {
        let power = sanitize_power(power);
        let dt = self.advance_clock(now);

        let step = self.state.integrator.step(
            power,
            dt,
            self.state.estimated_cp,
            self.state.estimated_w_prime,
        );
        self.state.balance = step.balance;
        self.state.min_balance = self.state.min_balance.min(step.balance);

        self.re_estimate(&step);

        self.state.matches.observe(&MatchInput {
            power,
            now,
            dt,
            estimated_cp: self.state.estimated_cp,
            estimated_w_prime: self.state.estimated_w_prime,
        });

        self.state.balance
    }

    /// [`Engine::update`] for a sample from a source
    pub fn update_sample(&mut self, sample: &PowerSample) -> Joules {
        self.update(sample.effective_power(), sample.timestamp)
    }

    /// Seconds since the previous sample; zero for the seed call and for
    /// duplicate or out-of-order timestamps.
    fn advance_clock(&mut self, now: Timestamp) -> f64 {
        match self.state.last_sample_time {
            None => {
                self.state.last_sample_time = Some(now);
                0.0
            }
            Some(last) if now > last => {
                self.state.last_sample_time = Some(now);
                (now - last) as f64 / 1000.0
            }
            Some(last) => {
                if now < last {
                    warn!(now, last, "Out-of-order sample timestamp, ignoring interval");
                } else {
                    debug!(now, "Duplicate sample timestamp");
                }
                0.0
            }
        }
    }

    /// Milestone-gated re-estimation of CP and test W'
    fn re_estimate(&mut self, step: &IntegrationStep) -> Option<ReEstimation> {
        let inputs = FitInputs {
            avg_power_above_cp: self.state.integrator.avg_power_above_cp(),
            time_above_cp_secs: self.state.integrator.time_above_cp_secs(),
            estimated_cp: self.state.estimated_cp,
            estimated_w_prime: self.state.estimated_w_prime,
        };
        let outcome = self
            .state
            .estimator
            .evaluate(step.balance, step.expended, &inputs)?;

        if let Some(cp) = outcome.critical_power {
            self.state.estimated_cp = cp;
        }
        Some(outcome)
    }

    pub fn current_balance(&self) -> Joules {
        self.state.balance
    }

    /// Balance as a percentage of the live W' estimate
    pub fn percent_balance(&self) -> f64 {
        if self.state.estimated_w_prime > 0.0 {
            100.0 * self.state.balance / self.state.estimated_w_prime
        } else {
            0.0
        }
    }

    pub fn min_balance(&self) -> Joules {
        self.state.min_balance
    }

    pub fn estimated_cp(&self) -> Watts {
        self.state.estimated_cp
    }

    pub fn estimated_w_prime(&self) -> Joules {
        self.state.estimated_w_prime
    }

    pub fn initial_cp(&self) -> Watts {
        self.state.critical_power_initial
    }

    pub fn initial_w_prime(&self) -> Joules {
        self.state.w_prime_initial
    }

    /// 20-minute-test equivalent W' from the latest CP estimate
    pub fn test_w_prime(&self) -> Joules {
        self.state.estimator.test_w_prime()
    }

    /// Initial W' less the next re-estimation milestone
    pub fn modified_w_prime(&self) -> Joules {
        self.state.estimator.modified_w_prime()
    }

    pub fn next_update_level(&self) -> Joules {
        self.state.estimator.next_update_level()
    }

    pub fn tau(&self) -> f64 {
        self.state.integrator.tau(self.state.estimated_cp)
    }

    pub fn avg_power_below_cp(&self) -> Watts {
        self.state.integrator.avg_power_below_cp()
    }

    pub fn avg_power_above_cp(&self) -> Option<Watts> {
        self.state.integrator.avg_power_above_cp()
    }

    pub fn time_above_cp(&self) -> Duration {
        Duration::from_secs_f64(self.state.integrator.time_above_cp_secs())
    }

    pub fn elapsed_ride_time(&self) -> Duration {
        Duration::from_secs_f64(self.state.integrator.elapsed_secs())
    }

    pub fn session_start(&self) -> Timestamp {
        self.state.session_start
    }

    /// Timestamp of the previous processed sample, `None` before the first
    pub fn last_sample_time(&self) -> Option<Timestamp> {
        self.state.last_sample_time
    }

    pub fn matches_count(&self) -> u32 {
        self.state.matches.count()
    }

    pub fn in_effort_block(&self) -> bool {
        self.state.matches.in_match()
    }

    pub fn last_match(&self) -> Option<MatchSummary> {
        self.state.matches.last()
    }

    pub fn last_match_duration(&self) -> Duration {
        self.last_match()
            .map(|m| Duration::from_secs_f64(m.duration_secs))
            .unwrap_or_default()
    }

    pub fn last_match_energy(&self) -> Joules {
        self.last_match().map(|m| m.energy).unwrap_or(0.0)
    }

    pub fn current_match_energy(&self) -> Joules {
        self.state.matches.current_energy()
    }

    pub fn match_config(&self) -> &MatchConfig {
        &self.match_config
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn maximal_power_available(&self) -> Watts {
        projection::maximal_power_available(self.state.balance, self.state.estimated_cp, self.tau())
    }

    /// Linear time to exhaustion at `sustained_power`, `None` when unbounded
    pub fn time_to_exhaustion(&self, sustained_power: Watts) -> Option<Duration> {
        projection::time_to_exhaustion(self.state.balance, self.state.estimated_cp, sustained_power)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session_start: self.state.session_start,
            last_sample_time: self.state.last_sample_time,
            elapsed_secs: self.state.integrator.elapsed_secs(),
            balance: self.state.balance,
            percent_balance: self.percent_balance(),
            min_balance: self.state.min_balance,
            initial_cp: self.state.critical_power_initial,
            initial_w_prime: self.state.w_prime_initial,
            estimated_cp: self.state.estimated_cp,
            estimated_w_prime: self.state.estimated_w_prime,
            test_w_prime: self.test_w_prime(),
            modified_w_prime: self.modified_w_prime(),
            next_update_level: self.next_update_level(),
            tau: self.tau(),
            maximal_power_available: self.maximal_power_available(),
            match_count: self.matches_count(),
            in_effort_block: self.in_effort_block(),
            current_match_energy: self.current_match_energy(),
            last_match: self.last_match(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BelowCpAverage;
    use proptest::prelude::*;

    fn ride(engine: &mut Engine, power: Watts, start: Timestamp, seconds: u64) -> Timestamp {
        let mut now = start;
        for _ in 0..seconds {
            now += 1000;
            engine.update(power, now);
        }
        now
    }

    #[test]
    fn test_constraints_raise_low_cp() {
        let constrained = apply_constraints(80.0, 1000.0);
        assert_eq!(constrained.critical_power, 100.0);
        assert_eq!(constrained.w_prime, constrained.test_w_prime);
        assert!((constrained.w_prime - 5400.0).abs() < 1e-6);
    }

    #[test]
    fn test_constraints_keep_plausible_values() {
        let constrained = apply_constraints(250.0, 20000.0);
        assert_eq!(constrained.critical_power, 250.0);
        assert_eq!(constrained.w_prime, 20000.0);
    }

    #[test]
    fn test_constraints_reject_non_finite() {
        let constrained = apply_constraints(f64::NAN, f64::INFINITY);
        assert_eq!(constrained.critical_power, 100.0);
        assert_eq!(constrained.w_prime, constrained.test_w_prime);
    }

    #[test]
    fn test_seed_call() {
        let mut engine = Engine::new(250.0, 20000.0, 5000);
        assert_eq!(engine.last_sample_time(), None);

        let balance = engine.update(500.0, 7000);

        assert_eq!(balance, 20000.0);
        assert_eq!(engine.last_sample_time(), Some(7000));
        assert_eq!(engine.elapsed_ride_time(), Duration::ZERO);
        assert_eq!(engine.avg_power_above_cp(), None);
    }

    #[test]
    fn test_depletion_and_recovery() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 0);

        let now = ride(&mut engine, 300.0, 0, 60);
        let depleted = engine.current_balance();
        assert!(depleted < 20000.0);

        ride(&mut engine, 50.0, now, 600);
        assert!(engine.current_balance() > depleted);
        assert!(engine.current_balance() <= 20000.0);
    }

    #[test]
    fn test_out_of_order_timestamp_is_ignored() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 10_000);
        engine.update(400.0, 11_000);
        let balance = engine.current_balance();
        let elapsed = engine.elapsed_ride_time();

        assert_eq!(engine.update(400.0, 9_000), balance);
        assert_eq!(engine.update(400.0, 11_000), balance);
        assert_eq!(engine.elapsed_ride_time(), elapsed);
        assert_eq!(engine.last_sample_time(), Some(11_000));
    }

    #[test]
    fn test_duplicate_after_re_estimation_keeps_balance() {
        let mut engine = Engine::new(140.0, 7200.0, 0);
        engine.update(100.0, 0);

        let mut now = 0;
        let mut balance = engine.current_balance();
        while engine.estimated_cp() == 140.0 {
            assert!(now < 840_000, "CP should be re-estimated within the block");
            now += 1000;
            balance = engine.update(175.0, now);
        }

        assert_eq!(engine.update(175.0, now), balance);
        assert_eq!(engine.update(175.0, now - 500), balance);
    }

    #[test]
    fn test_negative_power_is_zero() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 0);
        engine.update(-300.0, 1000);
        assert_eq!(engine.current_balance(), 20000.0);
        assert_eq!(engine.avg_power_below_cp(), 0.0);
    }

    #[test]
    fn test_irregular_gap_counts_full_interval() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 0);
        engine.update(300.0, 5000);

        assert_eq!(engine.elapsed_ride_time(), Duration::from_secs(5));
        assert_eq!(engine.current_balance(), 19500.0);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 0);
        let now = ride(&mut engine, 400.0, 0, 120);
        ride(&mut engine, 100.0, now, 5);
        assert!(engine.matches_count() > 0);

        engine.reset(200_000);

        assert_eq!(engine.current_balance(), engine.estimated_w_prime());
        assert_eq!(engine.estimated_cp(), 200.0);
        assert_eq!(engine.matches_count(), 0);
        assert_eq!(engine.last_sample_time(), None);
        assert_eq!(engine.elapsed_ride_time(), Duration::ZERO);
        assert_eq!(engine.next_update_level(), 20000.0);
        assert_eq!(engine.session_start(), 200_000);
    }

    #[test]
    fn test_reconfigure_applies_floor() {
        let mut engine = Engine::new(250.0, 20000.0, 0);
        engine.reconfigure(90.0, 2000.0, 1000);

        assert_eq!(engine.initial_cp(), 100.0);
        assert_eq!(engine.estimated_cp(), 100.0);
        assert!(engine.estimated_w_prime() >= twenty_minute_test_w_prime(100.0).unwrap());
        assert_eq!(engine.current_balance(), engine.estimated_w_prime());
    }

    #[test]
    fn test_sustained_effort_raises_cp() {
        let mut engine = Engine::new(140.0, 7200.0, 0);
        engine.update(0.0, 0);
        ride(&mut engine, 175.0, 0, 840);

        assert!(engine.estimated_cp() > 140.0);
        assert!(engine.test_w_prime() > twenty_minute_test_w_prime(140.0).unwrap());
        assert!(engine.modified_w_prime() > 0.0);
        assert!(engine.next_update_level() < engine.initial_w_prime());
    }

    #[test]
    fn test_re_estimation_toggle() {
        let options = EngineOptions {
            re_estimation: false,
            ..EngineOptions::default()
        };
        let mut engine = Engine::with_options(140.0, 7200.0, MatchConfig::default(), options, 0);
        engine.update(0.0, 0);
        ride(&mut engine, 175.0, 0, 840);

        assert_eq!(engine.estimated_cp(), 140.0);
        assert_eq!(engine.modified_w_prime(), 0.0);
    }

    #[test]
    fn test_set_options_resets_ride() {
        let mut engine = Engine::new(140.0, 7200.0, 0);
        engine.update(0.0, 0);
        ride(&mut engine, 300.0, 0, 30);

        let options = EngineOptions {
            re_estimation: false,
            ..EngineOptions::default()
        };
        engine.set_options(options, 100_000);
        assert_eq!(engine.options(), &options);
        assert_eq!(engine.session_start(), 100_000);
        assert_eq!(engine.last_sample_time(), None);
        assert_eq!(engine.current_balance(), engine.initial_w_prime());

        engine.update(0.0, 100_000);
        ride(&mut engine, 175.0, 100_000, 840);
        assert_eq!(engine.estimated_cp(), 140.0);
    }

    #[test]
    fn test_trailing_average_policy() {
        let options = EngineOptions {
            below_cp_average: BelowCpAverage::Trailing { window_secs: 60.0 },
            ..EngineOptions::default()
        };
        let mut engine = Engine::with_options(250.0, 20000.0, MatchConfig::default(), options, 0);
        engine.update(0.0, 0);
        let now = ride(&mut engine, 50.0, 0, 600);
        ride(&mut engine, 200.0, now, 120);

        assert_eq!(engine.avg_power_below_cp(), 200.0);
    }

    #[test]
    fn test_snapshot_matches_accessors() {
        let mut engine = Engine::new(200.0, 20000.0, 0);
        engine.update(0.0, 0);
        ride(&mut engine, 320.0, 0, 30);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.balance, engine.current_balance());
        assert_eq!(snapshot.estimated_cp, engine.estimated_cp());
        assert_eq!(snapshot.in_effort_block, engine.in_effort_block());
        assert_eq!(snapshot.maximal_power_available, engine.maximal_power_available());
        assert_eq!(
            snapshot.time_to_exhaustion(400.0),
            engine.time_to_exhaustion(400.0)
        );
    }

    proptest! {
        #[test]
        fn test_floor_property(cp in 0.0f64..100.0, w_prime in 0.0f64..50000.0) {
            let engine = Engine::new(cp, w_prime, 0);
            prop_assert_eq!(engine.estimated_cp(), 100.0);
            prop_assert!(engine.estimated_w_prime() >= twenty_minute_test_w_prime(100.0).unwrap());
        }

        #[test]
        fn test_estimates_never_decrease(
            cp in 150.0f64..300.0,
            w_prime in 10000.0f64..30000.0,
            powers in proptest::collection::vec(0.0f64..600.0, 1..600)
        ) {
            let mut engine = Engine::new(cp, w_prime, 0);
            let initial_cp = engine.estimated_cp();
            let initial_test_w = engine.test_w_prime();
            engine.update(0.0, 0);

            let mut now = 0;
            for power in powers {
                now += 1000;
                engine.update(power, now);
                prop_assert!(engine.estimated_cp() >= initial_cp);
                prop_assert!(engine.test_w_prime() >= initial_test_w);
            }
        }

        #[test]
        fn test_depletion_strict_through_re_estimation(
            cp in 120.0f64..200.0,
            intensity in 1.1f64..1.5,
            seconds in 300u64..900,
            w_prime in 10000.0f64..30000.0
        ) {
            let mut engine = Engine::new(cp, w_prime, 0);
            engine.update(0.0, 0);
            let power = cp * intensity;

            let mut previous = engine.current_balance();
            for second in 1..=seconds {
                let cp_before = engine.estimated_cp();
                let balance = engine.update(power, second * 1000);
                if power > cp_before {
                    prop_assert!(balance < previous, "balance rose above CP at {}s", second);
                }
                previous = balance;
            }
            prop_assert!(engine.estimated_cp() >= cp);
        }

        #[test]
        fn test_recovery_never_loses_balance(
            cp in 150.0f64..350.0,
            w_prime in 10000.0f64..30000.0,
            effort in 1.0f64..400.0,
            effort_secs in 1u64..240,
            rest_secs in 1u64..900
        ) {
            let mut engine = Engine::new(cp, w_prime, 0);
            engine.update(0.0, 0);
            let now = ride(&mut engine, cp + effort, 0, effort_secs);

            let mut previous = engine.current_balance();
            let mut t = now;
            for _ in 0..rest_secs {
                t += 1000;
                let balance = engine.update(0.0, t);
                prop_assert!(balance >= previous);
                prop_assert!(balance <= engine.estimated_w_prime().round());
                previous = balance;
            }
        }

        #[test]
        fn test_elapsed_time_non_decreasing(
            steps in proptest::collection::vec((0u64..5000, 0.0f64..500.0), 1..200)
        ) {
            let mut engine = Engine::new(200.0, 20000.0, 0);
            let mut now = 100_000u64;
            let mut elapsed = engine.elapsed_ride_time();
            for (jitter, power) in steps {
                // Occasionally step backwards in time
                now = if jitter % 7 == 0 { now.saturating_sub(jitter) } else { now + jitter };
                engine.update(power, now);
                prop_assert!(engine.elapsed_ride_time() >= elapsed);
                elapsed = engine.elapsed_ride_time();
            }
        }
    }
}
