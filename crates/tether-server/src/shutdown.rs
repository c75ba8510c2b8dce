//! Graceful shutdown coordination.
//!
//! Background loops (ping loops, the sweep loop, the HTTP server) select on
//! child tokens of one root [`CancellationToken`]. Long-lived tasks register
//! their handles here so shutdown can wait for them.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Budget for [`ShutdownCoordinator::graceful_shutdown`] when none is given.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Root cancellation token plus the tasks that should finish before exit.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Fresh coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled at shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token cancelled at shutdown or when cancelled itself.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait for `handle` during graceful shutdown.
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `timeout` for tracked tasks.
    ///
    /// Tasks still running when the budget runs out are aborted. Returns
    /// whether every task finished in time.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        info!(task_count = handles.len(), timeout_secs = timeout.as_secs(), "waiting for tasks to stop");
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(timeout, futures::future::join_all(handles)).await.is_ok() {
            true
        } else {
            warn!(?timeout, "shutdown budget exhausted, aborting remaining tasks");
            aborts.iter().for_each(tokio::task::AbortHandle::abort);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn child_tokens_follow_root() {
        let coord = ShutdownCoordinator::new();
        let child = coord.child_token();
        let root = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(child.is_cancelled());
        assert!(root.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_root_alone() {
        let coord = ShutdownCoordinator::new();
        coord.child_token().cancel();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));

        assert!(coord.graceful_shutdown(None).await);
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tasks_are_aborted() {
        let coord = ShutdownCoordinator::new();
        let (_keep, rx) = tokio::sync::oneshot::channel::<()>();
        coord.track(tokio::spawn(async move {
            let _ = rx.await;
        }));

        assert!(!coord.graceful_shutdown(Some(Duration::from_millis(100))).await);
    }
}
