//! Ride session driver
//!
//! Pulls samples from a [`SampleSource`] into a [`SharedEngine`], recording a
//! snapshot every `sample_every` samples, and produces the end-of-ride summary.

use tracing::{info, info_span};

use crate::engine::EngineSnapshot;
use crate::error::Result;
use crate::outputs::SessionSummary;
use crate::replay::SampleSource;
use crate::shared::SharedEngine;

/// Result of feeding a whole source through the engine
#[derive(Debug, Clone)]
pub struct RideReport {
    pub samples: usize,
    /// Periodic snapshots, always ending with the final state
    pub snapshots: Vec<EngineSnapshot>,
    pub summary: SessionSummary,
}

/// Feed every sample from `source`; `sample_every` of 0 records only the end
pub fn run_ride<S: SampleSource>(
    engine: &SharedEngine,
    source: &mut S,
    sample_every: usize,
) -> Result<RideReport> {
    let span = info_span!("ride");
    let _guard = span.enter();

    let mut samples = 0usize;
    let mut snapshots = Vec::new();

    while let Some(sample) = source.next_sample() {
        engine.update_sample(&sample?);
        samples += 1;

        if sample_every > 0 && samples % sample_every == 0 {
            snapshots.push(engine.snapshot());
        }
    }

    let last = engine.snapshot();
    if snapshots.last() != Some(&last) {
        snapshots.push(last.clone());
    }

    let summary = SessionSummary::from_snapshot(&last);
    info!(
        samples,
        final_balance = summary.final_balance,
        matches = summary.match_count,
        "Ride finished"
    );
    if let Some(notification) = summary.notification() {
        info!(%notification, "New estimate discovered");
    }

    Ok(RideReport {
        samples,
        snapshots,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::models::PowerSample;
    use crate::replay::VecSource;

    #[test]
    fn test_periodic_snapshots() {
        let engine = SharedEngine::new(Engine::new(200.0, 20000.0, 0));
        let mut source = VecSource::from_blocks(0, &[(150.0, 60), (300.0, 45)]);

        let report = run_ride(&engine, &mut source, 30).unwrap();

        assert_eq!(report.samples, 105);
        // 30, 60, 90 plus the final state at 105
        assert_eq!(report.snapshots.len(), 4);
        assert_eq!(report.snapshots.last().unwrap().last_sample_time, Some(105_000));
        assert_eq!(report.summary.final_balance, engine.current_balance());
    }

    #[test]
    fn test_empty_source() {
        let engine = SharedEngine::new(Engine::new(200.0, 20000.0, 0));
        let mut source = VecSource::new(Vec::<PowerSample>::new());

        let report = run_ride(&engine, &mut source, 10).unwrap();
        assert_eq!(report.samples, 0);
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(report.summary.final_balance, 20000.0);
    }
}
