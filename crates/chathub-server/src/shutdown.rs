//! Hub-wide cancellation and task tracking.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// Owns the root cancellation token and tracks every client task.
///
/// Each client holds a child of the root token, so cancelling the root
/// stops every pump at once.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token cancelled with the root but also cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Cancel the root token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Hold a token for as long as a task should delay shutdown completion.
    pub fn track(&self) -> TaskTrackerToken {
        self.tasks.token()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future)
    }

    /// Number of live tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `timeout` for tracked tasks to finish.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.tasks.close();
        info!(
            task_count = self.task_count(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for client tasks to finish"
        );
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.task_count(),
                "shutdown timed out after {timeout:?}, some client tasks are still running"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
