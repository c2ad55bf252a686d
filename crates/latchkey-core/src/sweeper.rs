//! Background sweeping for registries in periodic mode
//!
//! The sweeper holds only a weak reference to the registry and exits on
//! its own once every registry handle is dropped.

use crate::config::SweepMode;
use crate::registry::TokenRegistry;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tokio task calling [`TokenRegistry::sweep`] on a fixed interval
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct PeriodicSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicSweeper {
    /// Start sweeping `registry` every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(registry: &TokenRegistry, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let registry = registry.downgrade();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = registry.upgrade() else {
                            tracing::info!("Registry dropped, stopping sweeper");
                            break;
                        };
                        TokenRegistry::from_shared(shared).sweep();
                    }
                }
            }
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "Periodic sweeper started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Start a sweeper if the registry is configured for periodic sweeping
    pub fn from_config(registry: &TokenRegistry) -> Option<Self> {
        let config = registry.config();
        match config.sweep {
            SweepMode::Periodic => Some(Self::spawn(registry, config.sweep_interval())),
            SweepMode::Lazy => None,
        }
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            tracing::info!("Stopping periodic sweeper");
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Sweeper task did not exit cleanly");
            }
        }
    }
}

impl Drop for PeriodicSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
