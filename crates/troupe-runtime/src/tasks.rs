//! Follow-up work started by a behavior
//!
//! TigerStyle: Every task is tracked, every task can be cancelled.
//!
//! Handles live in an id-keyed arena and remove themselves on completion.
//! Stop and restart cancel everything still outstanding. A task that wakes up
//! after its actor was dismissed does nothing.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use troupe_core::constants::TASK_DELAY_MS_MAX;
use troupe_core::{Executor, TaskHandle};
use tracing::trace;

/// Identifier of a follow-up task within one actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

struct TaskArena {
    executor: Arc<dyn Executor>,
    halted: Arc<AtomicBool>,
    handles: Mutex<HashMap<u64, TaskHandle>>,
    next_id: AtomicU64,
}

/// Task facility bound to one actor
#[derive(Clone)]
pub struct TaskScope {
    arena: Arc<TaskArena>,
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("outstanding", &self.len())
            .finish()
    }
}

impl TaskScope {
    /// Create a scope whose tasks no-op once `halted` is set
    pub(crate) fn new(executor: Arc<dyn Executor>, halted: Arc<AtomicBool>) -> Self {
        Self {
            arena: Arc::new(TaskArena {
                executor,
                halted,
                handles: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Run `task` as soon as possible
    pub fn spawn<F>(&self, task: F) -> TaskId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(Box::pin(task), None)
    }

    /// Run `task` after `delay`
    ///
    /// # Panics
    /// Panics if `delay` exceeds `TASK_DELAY_MS_MAX`.
    pub fn schedule<F>(&self, task: F, delay: Duration) -> TaskId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        assert!(
            delay.as_millis() <= u128::from(TASK_DELAY_MS_MAX),
            "task delay {:?} exceeds limit",
            delay
        );
        self.submit(Box::pin(task), Some(delay))
    }

    /// Cancel one task; returns whether it was still outstanding
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.arena.handles.lock().remove(&id.0) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding task
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TaskHandle> = self.arena.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    /// Number of outstanding tasks
    pub fn len(&self) -> usize {
        self.arena.handles.lock().len()
    }

    /// Whether no task is outstanding
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn submit(&self, task: BoxFuture<'static, ()>, delay: Option<Duration>) -> TaskId {
        let id = self.arena.next_id.fetch_add(1, Ordering::Relaxed);
        let arena: Weak<TaskArena> = Arc::downgrade(&self.arena);
        let halted = self.arena.halted.clone();

        let wrapped: BoxFuture<'static, ()> = Box::pin(async move {
            if halted.load(Ordering::SeqCst) {
                trace!(task_id = id, "Actor dismissed, skipping task");
            } else {
                task.await;
            }
            if let Some(arena) = arena.upgrade() {
                arena.handles.lock().remove(&id);
            }
        });

        // Hold the arena lock across spawn so completion cannot race insertion
        let mut handles = self.arena.handles.lock();
        let handle = match delay {
            Some(delay) => self.arena.executor.schedule(wrapped, delay),
            None => self.arena.executor.spawn(wrapped),
        };
        if !handle.is_finished() {
            handles.insert(id, handle);
        }
        TaskId(id)
    }
}
