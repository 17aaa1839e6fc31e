//! Engine owner task
//!
//! The engine lives inside a single tokio task. Samples and reconfiguration
//! commands arrive on one bounded channel, so they are applied strictly in
//! order, and every applied command publishes a fresh snapshot on a `watch`
//! channel for any number of readers. The task ends when every command sender
//! has been dropped and hands back the engine.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{Engine, EngineSnapshot};
use crate::error::{Result, WbalError};
use crate::models::{EngineOptions, Joules, MatchConfig, PowerSample, Timestamp, Watts};

/// Messages accepted by the engine task
#[derive(Debug, Clone, Copy)]
pub enum EngineCommand {
    Sample(PowerSample),
    Reset { now: Timestamp },
    Reconfigure {
        critical_power: Watts,
        w_prime: Joules,
        now: Timestamp,
    },
    SetMatchConfig { config: MatchConfig, now: Timestamp },
    SetOptions { options: EngineOptions, now: Timestamp },
}

/// Cloneable handle to a running engine task
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WbalError::Channel("engine task has stopped".to_string()))
    }

    pub async fn push_sample(&self, sample: PowerSample) -> Result<()> {
        self.send(EngineCommand::Sample(sample)).await
    }

    pub async fn reset(&self, now: Timestamp) -> Result<()> {
        self.send(EngineCommand::Reset { now }).await
    }

    pub async fn reconfigure(&self, critical_power: Watts, w_prime: Joules, now: Timestamp) -> Result<()> {
        self.send(EngineCommand::Reconfigure {
            critical_power,
            w_prime,
            now,
        })
        .await
    }

    pub async fn set_match_config(&self, config: MatchConfig, now: Timestamp) -> Result<()> {
        self.send(EngineCommand::SetMatchConfig { config, now }).await
    }

    pub async fn set_options(&self, options: EngineOptions, now: Timestamp) -> Result<()> {
        self.send(EngineCommand::SetOptions { options, now }).await
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }
}

/// Move `engine` into a new task; `capacity` bounds queued commands
pub fn spawn_engine(engine: Engine, capacity: usize) -> (EngineHandle, JoinHandle<Engine>) {
    let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());

    let task = tokio::spawn(run_engine(engine, command_rx, snapshot_tx));

    (
        EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

async fn run_engine(
    mut engine: Engine,
    mut commands: mpsc::Receiver<EngineCommand>,
    snapshots: watch::Sender<EngineSnapshot>,
) -> Engine {
    info!("Engine task started");

    while let Some(command) = commands.recv().await {
        match command {
            EngineCommand::Sample(sample) => {
                engine.update_sample(&sample);
            }
            EngineCommand::Reset { now } => engine.reset(now),
            EngineCommand::Reconfigure {
                critical_power,
                w_prime,
                now,
            } => engine.reconfigure(critical_power, w_prime, now),
            EngineCommand::SetMatchConfig { config, now } => engine.set_match_config(config, now),
            EngineCommand::SetOptions { options, now } => engine.set_options(options, now),
        }
        // Readers may all be gone; the engine keeps running for the owner.
        if snapshots.send(engine.snapshot()).is_err() {
            debug!("No snapshot subscribers");
        }
    }

    info!(balance = engine.current_balance(), "Engine task stopped");
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BelowCpAverage;

    #[tokio::test]
    async fn test_samples_are_applied_in_order() {
        let (handle, task) = spawn_engine(Engine::new(200.0, 20000.0, 0), 16);

        handle.push_sample(PowerSample::new(0.0, 0)).await.unwrap();
        for second in 1..=60u64 {
            handle
                .push_sample(PowerSample::new(300.0, second * 1000))
                .await
                .unwrap();
        }
        drop(handle);

        let engine = task.await.unwrap();
        assert_eq!(engine.last_sample_time(), Some(60_000));
        assert!(engine.current_balance() < 20000.0);
        assert!(engine.in_effort_block());
    }

    #[tokio::test]
    async fn test_snapshots_follow_commands() {
        let (handle, task) = spawn_engine(Engine::new(200.0, 20000.0, 0), 4);
        let mut updates = handle.subscribe();

        handle.push_sample(PowerSample::new(0.0, 0)).await.unwrap();
        handle.push_sample(PowerSample::new(500.0, 10_000)).await.unwrap();
        handle.reconfigure(250.0, 25000.0, 20_000).await.unwrap();

        updates
            .wait_for(|snapshot| snapshot.initial_cp == 250.0)
            .await
            .unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.balance, 25000.0);
        assert_eq!(snapshot.last_sample_time, None);

        drop(updates);
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_options_command() {
        let (handle, task) = spawn_engine(Engine::new(200.0, 20000.0, 0), 4);
        let options = EngineOptions {
            below_cp_average: BelowCpAverage::Trailing { window_secs: 60.0 },
            ..EngineOptions::default()
        };

        handle.push_sample(PowerSample::new(0.0, 0)).await.unwrap();
        handle.push_sample(PowerSample::new(500.0, 10_000)).await.unwrap();
        handle.set_options(options, 20_000).await.unwrap();
        drop(handle);

        let engine = task.await.unwrap();
        assert_eq!(engine.options(), &options);
        assert_eq!(engine.session_start(), 20_000);
        assert_eq!(engine.current_balance(), 20000.0);
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let (handle, task) = spawn_engine(Engine::new(200.0, 20000.0, 0), 1);
        task.abort();
        let _ = task.await;

        let err = handle.reset(0).await.unwrap_err();
        assert!(matches!(err, WbalError::Channel(_)));
    }
}
