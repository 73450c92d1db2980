//! Any-thread worker task posting

use crate::dispatcher::DelayedDispatcher;
use crate::pool::Threadpool;
use crate::task::{PoolTask, Task, TaskState};
use std::sync::Arc;

/// Facade combining the [`Threadpool`] and the [`DelayedDispatcher`] for
/// tasks that may run on any thread.
pub struct WorkerTaskRunner {
    pool: Arc<Threadpool>,
    delayed: DelayedDispatcher,
}

impl WorkerTaskRunner {
    /// Build the runner on a shared pool and start its dispatch thread.
    pub fn new(pool: Arc<Threadpool>) -> Self {
        let delayed = DelayedDispatcher::start(Arc::clone(&pool));
        Self { pool, delayed }
    }

    /// Post a task for immediate execution on some worker thread.
    pub fn post(&self, task: Box<dyn Task>) -> Arc<TaskState> {
        self.pool.post(PoolTask::engine(task))
    }

    /// Post a task to run no sooner than `delay_seconds` from now.
    pub fn post_delayed(&self, task: Box<dyn Task>, delay_seconds: f64) {
        self.delayed.post_delayed(task, delay_seconds);
    }

    /// Block until every task posted to the pool has completed.
    pub fn blocking_drain(&self) {
        self.pool.blocking_drain();
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Stop the delayed dispatcher. Pool teardown is left to the drop order
    /// of whoever owns the last pool reference.
    pub fn shutdown(&self) {
        self.delayed.stop();
    }
}
