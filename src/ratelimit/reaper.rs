//! Background eviction of idle rate limit counters.
//!
//! Without a sweep, every one-off client (a single visit from a new IP)
//! leaves a record behind forever. The reaper periodically asks each
//! watched store to drop records that have been expired for longer than
//! the store's idle threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info};

use super::clock::Clock;
use super::store::KeyedCounterStore;
use crate::error::{Result, TurnstileError};

/// Periodic sweeper over one or more counter stores.
#[derive(Debug)]
pub struct Reaper {
    stores: Vec<Arc<KeyedCounterStore>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Reaper {
    /// Create a reaper that sweeps every `interval`.
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if interval.is_zero() {
            return Err(TurnstileError::Config(
                "sweep interval must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            stores: Vec::new(),
            clock,
            interval,
        })
    }

    /// Add a store to sweep.
    pub fn watch(mut self, store: Arc<KeyedCounterStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Get the sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep every watched store once. Returns the number of records removed.
    pub fn sweep_once(&self) -> usize {
        let now = self.clock.now();
        self.stores.iter().map(|store| store.sweep(now)).sum()
    }

    /// Start sweeping on a background task.
    ///
    /// Must be called from within a tokio runtime. Each tick locks a store
    /// one shard at a time, so request-path checks wait at most for the
    /// scan of a single shard.
    pub fn start(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval = ?self.interval,
            stores = self.stores.len(),
            "Starting rate limit reaper"
        );

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep_once();
                        debug!(removed, "Reaper sweep finished");
                    }
                    _ = &mut shutdown_rx => {
                        info!("Rate limit reaper stopped");
                        break;
                    }
                }
            }
        });

        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running [`Reaper`].
///
/// Dropping the handle also stops the reaper, without waiting for it.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
