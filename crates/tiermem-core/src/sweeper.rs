//! Periodic sweeper
//!
//! Runs [`TieredStore::sweep`] on a blocking thread every interval tick. The
//! first sweep happens immediately on spawn.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::store::TieredStore;

/// Background expiry sweeper for a shared store
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(store: Arc<TieredStore>, every: Duration) -> SweeperHandle {
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);

        info!(interval_secs = every.as_secs_f64(), "Starting expiry sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.sweep()).await {
                    Ok(Ok(count)) => {
                        counter.fetch_add(count, Ordering::Relaxed);
                        debug!(removed = count, "Sweep cycle complete");
                    }
                    Ok(Err(e)) => error!(error = %e, "Sweep failed"),
                    Err(e) => error!(error = %e, "Sweep task panicked"),
                }
            }
        });

        SweeperHandle {
            task: Some(task),
            removed,
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the sweeper.
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
    removed: Arc<AtomicUsize>,
}

impl SweeperHandle {
    /// Total entries removed since spawn
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweeper and wait for the task to wind down.
    ///
    /// A sweep already running on the blocking pool finishes on its own.
    pub async fn shutdown(mut self) -> usize {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!(removed = self.removed(), "Expiry sweeper stopped");
        self.removed()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
