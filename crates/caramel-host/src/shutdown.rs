//! Cancellation and task draining for one host run.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What happened to the tracked tasks during shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    pub aborted: usize,
}

/// Owns the run's cancellation token and the tasks that must stop with it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token for a task that stops when the run stops.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Hand a task to the coordinator so shutdown can wait for it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, wait up to `timeout` for every tracked task, then abort the rest.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.token.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let total = handles.len();
        info!(task_count = total, timeout_ms = timeout.as_millis() as u64, "draining host tasks");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.completed += 1,
                Err(_) => {
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }
        if report.aborted > 0 {
            warn!(aborted = report.aborted, "tasks did not stop in time and were aborted");
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_follow_the_run() {
        let coord = ShutdownCoordinator::new();
        let a = coord.token();
        let b = coord.token();
        assert!(!coord.is_shutting_down());
        coord.token.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_the_run() {
        let coord = ShutdownCoordinator::new();
        let child = coord.token();
        child.cancel();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn cooperative_tasks_complete() {
        let coord = ShutdownCoordinator::new();
        for _ in 0..3 {
            let token = coord.token();
            coord.track(tokio::spawn(async move { token.cancelled().await }));
        }
        assert_eq!(coord.tracked(), 3);

        let report = coord.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport { completed: 3, aborted: 0 });
        assert_eq!(coord.tracked(), 0);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tasks_are_aborted() {
        let coord = ShutdownCoordinator::new();
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));
        let token = coord.token();
        coord.track(tokio::spawn(async move { token.cancelled().await }));

        let report = coord.shutdown(Duration::from_millis(100)).await;
        assert_eq!(report.completed, 1);
        assert_eq!(report.aborted, 1);
    }
}
