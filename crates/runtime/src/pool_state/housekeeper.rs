use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ConnectionPoolStateCache;

/// Background task purging expired pool states: once at start, then every TTL.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct PoolStateHousekeeper {
    task: Option<JoinHandle<()>>,
    ttl: Duration,
}

impl PoolStateHousekeeper {
    /// Spawns the housekeeping loop on the current tokio runtime.
    pub fn start(cache: Arc<ConnectionPoolStateCache>, ttl: Duration) -> Self {
        let period = ttl.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First tick completes immediately.
                interval.tick().await;
                let report = cache.purge(ttl);
                if report.evicted() > 0 {
                    tracing::debug!(
                        target: "conflux::pool_state",
                        evicted = report.evicted(),
                        "Housekeeping pass evicted pool states"
                    );
                }
            }
        });

        tracing::info!(
            target: "conflux::pool_state",
            ttl_secs = ttl.as_secs(),
            "Pool state housekeeper started"
        );
        Self {
            task: Some(task),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!(target: "conflux::pool_state", "Pool state housekeeper stopped");
        }
    }
}

impl Drop for PoolStateHousekeeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
