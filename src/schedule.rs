use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::error::Result;

/// Run `task` immediately and then every `interval`.
///
/// The first error the task returns cancels the schedule; there is no
/// retry. The returned handle can cancel it earlier.
pub fn schedule<F, Fut>(interval: Duration, mut task: F) -> Schedule
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let worker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = task().await {
                error!("scheduled task failed, cancelling the schedule: {e}");
                break;
            }
        }
    });

    Schedule { worker }
}

/// Handle on a running schedule.
pub struct Schedule {
    worker: JoinHandle<()>,
}

impl Schedule {
    pub fn cancel(&self) {
        self.worker.abort();
    }

    /// Whether the schedule has stopped, by cancellation or by a task
    /// error.
    pub fn is_stopped(&self) -> bool {
        self.worker.is_finished()
    }
}
