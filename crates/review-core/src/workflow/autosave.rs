//! Periodic background save of the active review
//!
//! One scheduler per session. It ticks on a fixed interval and asks its target
//! to save; the target decides whether a save is needed and skips (never
//! queues) when another write is in flight. The loop ends when stopped or
//! when the target reports the session is no longer active.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Result of one autosave tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Saved,
    /// Nothing changed since the last save
    Clean,
    /// Another save or write holds the write guard; this tick is dropped
    SaveInFlight,
    /// Session left the active phase; the scheduler should stop
    NotActive,
    /// Save failed; retried on the next tick
    Failed(String),
}

#[async_trait]
pub trait AutosaveTarget: Send + Sync {
    async fn autosave(&self) -> AutosaveOutcome;
}

/// Handle to a running autosave loop
pub struct AutosaveHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AutosaveHandle {
    /// Spawn the loop. The first tick fires one full interval after start.
    pub fn start<T: AutosaveTarget + 'static>(target: Arc<T>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("Autosave started (every {:?})", interval);
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match target.autosave().await {
                            AutosaveOutcome::Saved => debug!("Autosave stored review snapshot"),
                            AutosaveOutcome::Clean => debug!("Autosave skipped: no changes"),
                            AutosaveOutcome::SaveInFlight => debug!("Autosave skipped: save already in flight"),
                            AutosaveOutcome::Failed(e) => warn!("Autosave failed, will retry: {}", e),
                            AutosaveOutcome::NotActive => {
                                debug!("Autosave stopping: session no longer active");
                                break;
                            }
                        }
                    }
                }
            }
            info!("Autosave stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the loop, letting a tick that is already saving finish first
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Autosave task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Ask the loop to stop without waiting for it or cancelling a save in progress
    pub fn detach(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task.take();
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
