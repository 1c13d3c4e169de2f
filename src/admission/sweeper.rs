//! Periodic expiry sweep for the admission controller.
//!
//! The sweep exists purely to bound memory to the number of distinct active
//! keys; an expired entry left in place is treated as fresh on its next
//! access, so skipping a sweep never affects correctness.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::controller::AdmissionController;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle owning the background sweep task.
///
/// The task is tied to this handle's lifetime: dropping it (or calling
/// [`SweeperHandle::stop`]) aborts the task, so sweeps never outlive the
/// component that started them.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task.
    pub fn stop(self) {
        // Dropping aborts the task
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task that sweeps expired windows every `interval`.
///
/// Must be called from within a tokio runtime. The sweep takes the same
/// per-shard locks as ordinary admission checks, so it needs no further
/// coordination.
pub fn spawn_sweeper(
    controller: Arc<AdmissionController>,
    interval: Duration,
) -> SweeperHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = controller.sweep_expired();
            if removed > 0 {
                debug!(removed, "Swept expired rate limit windows");
            }
        }
    });

    SweeperHandle { task }
}
