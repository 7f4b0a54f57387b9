//! Reconciliation sweep for tasks that were persisted but never consumed.
//!
//! A task can sit in `Queued` forever if its publish was lost (process
//! crash between insert and push, or a dropped queue entry). The sweeper
//! periodically republishes every `Queued` task whose `updated_at` is older
//! than the staleness window. Delivery is at-least-once: a slow consumer
//! holding a task past the window will race the sweeper and the task may
//! be delivered twice.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::broker::Broker;
use crate::storage::TaskStore;

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// A `Queued` task untouched for this long is considered lost.
    pub stale_after: Duration,
    /// Time between sweep passes.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            interval: Duration::from_secs(10),
        }
    }
}

pub struct Sweeper {
    store: Arc<dyn TaskStore>,
    broker: Broker,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(store: Arc<dyn TaskStore>, broker: Broker, config: SweeperConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Run one sweep pass. Returns the number of tasks republished.
    ///
    /// A storage error aborts the pass (the next tick retries); a publish
    /// error skips that task and continues with the rest.
    #[instrument(skip(self, shutdown))]
    pub async fn sweep(&self, shutdown: &CancellationToken) -> usize {
        let stale = match self.store.get_all_unprocessed(self.config.stale_after).await {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "sweep aborted: could not list stale tasks");
                return 0;
            }
        };

        let mut republished = 0;
        for task in &stale {
            match self.broker.publish(shutdown, task).await {
                Ok(()) => republished += 1,
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "failed to republish stale task");
                }
            }
        }

        if republished > 0 {
            info!(count = republished, "republished stale tasks");
        }
        republished
    }

    /// Spawn the periodic sweep loop.
    ///
    /// The first interval tick is consumed immediately, so the initial
    /// sweep happens one full interval after spawn; run [`Self::sweep`]
    /// directly at startup if crash recovery must happen before consumers
    /// start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("sweeper shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep(&shutdown).await;
                    }
                }
            }
        })
    }
}
