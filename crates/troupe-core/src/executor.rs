//! Executor abstraction for the shared worker pool
//!
//! TigerStyle: Explicit executor trait with clear contracts.
//!
//! Agents never assume the executor serializes anything. Each agent layers its
//! own one-task-at-a-time queue and cancellation on top of whatever pool is
//! supplied here.
//!
//! ## Architecture
//!
//! ```text
//!   Agent serial queue ──┐
//!   Agent serial queue ──┼──> Executor ──> tokio worker threads
//!   Follow-up tasks    ──┘     (trait)
//! ```

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::warn;

/// A unit of work handed to an executor
pub type Task = BoxFuture<'static, ()>;

/// Handle to a spawned task
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    /// Wrap a tokio abort handle
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// Handle for a task that was never started
    pub fn detached() -> Self {
        Self { abort: None }
    }

    /// Cancel the task at its next await point
    pub fn abort(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Whether the task has completed, been cancelled, or never started
    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

/// Task execution facility consumed by the runtime
///
/// Preconditions:
/// - Tasks must be Send + 'static
///
/// Postconditions:
/// - After `shutdown`, new tasks are dropped without running
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a task as soon as a worker is free
    fn spawn(&self, task: Task) -> TaskHandle;

    /// Run a task after `delay`
    fn schedule(&self, task: Task, delay: Duration) -> TaskHandle;

    /// Stop accepting new tasks
    fn shutdown(&self);

    /// Whether `shutdown` has been called
    fn is_shutdown(&self) -> bool;
}

// =============================================================================
// TokioExecutor (Production)
// =============================================================================

/// Executor backed by a tokio runtime
///
/// TigerStyle: Thin wrapper over tokio with explicit contracts.
#[derive(Debug)]
pub struct TokioExecutor {
    handle: Handle,
    shutdown: AtomicBool,
}

impl TokioExecutor {
    /// Create an executor on the given runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Create an executor on the runtime the caller is running in
    ///
    /// # Errors
    /// Returns error when called outside of a tokio runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::Internal {
            reason: format!("no tokio runtime available: {}", e),
        })?;
        Ok(Self::new(handle))
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, task: Task) -> TaskHandle {
        if self.is_shutdown() {
            warn!("Executor shut down, dropping task");
            return TaskHandle::detached();
        }
        TaskHandle::new(self.handle.spawn(task).abort_handle())
    }

    fn schedule(&self, task: Task, delay: Duration) -> TaskHandle {
        if self.is_shutdown() {
            warn!(
                delay_ms = delay.as_millis() as u64,
                "Executor shut down, dropping scheduled task"
            );
            return TaskHandle::detached();
        }
        let delayed = async move {
            tokio::time::sleep(delay).await;
            task.await;
        };
        TaskHandle::new(self.handle.spawn(delayed).abort_handle())
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tokio_executor_spawn() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = oneshot::channel();

        executor.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_executor_schedule_waits() {
        let executor = TokioExecutor::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = executor.schedule(
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_handle_abort() {
        let executor = TokioExecutor::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = executor.schedule(
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
            Duration::from_millis(10),
        );
        handle.abort();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_drops_new_tasks() {
        let executor = TokioExecutor::current().unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());

        let handle = executor.spawn(Box::pin(async {}));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_current_outside_runtime_fails() {
        assert!(matches!(
            TokioExecutor::current(),
            Err(Error::Internal { .. })
        ));
    }
}
