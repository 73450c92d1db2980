//! Fixed-size worker pool
//!
//! The pool resolves its size once at construction (explicit parameter,
//! `UV_THREADPOOL_SIZE`, detected CPU count, then a fixed fallback), spawns
//! that many [`Worker`]s on one shared [`TaskQueue`], and never resizes.

use crate::queue::TaskQueue;
use crate::task::{PoolTask, TaskState};
use crate::worker::Worker;
use std::sync::Arc;

/// Environment variable consulted when no explicit size is given.
pub const POOL_SIZE_ENV: &str = "UV_THREADPOOL_SIZE";

/// Fallback size when nothing else yields a usable count.
const DEFAULT_POOL_SIZE: usize = 4;

/// Fixed-size pool of worker threads sharing one FIFO task queue.
pub struct Threadpool {
    queue: Arc<TaskQueue>,
    workers: Vec<Worker>,
}

impl Threadpool {
    /// Create a pool. `explicit_size` wins when non-zero; otherwise the size
    /// comes from [`POOL_SIZE_ENV`], then the detected CPU count, then 4.
    pub fn new(explicit_size: usize) -> Self {
        let env = std::env::var(POOL_SIZE_ENV).ok();
        let size = Self::resolve_size(explicit_size, env.as_deref());
        assert!(size >= 1);
        tracing::debug!(size, "starting threadpool");

        let queue = Arc::new(TaskQueue::new());
        let workers = (0..size)
            .map(|id| Worker::start(id, Arc::clone(&queue)))
            .collect();
        Self { queue, workers }
    }

    fn resolve_size(explicit: usize, env: Option<&str>) -> usize {
        if explicit > 0 {
            return explicit;
        }
        // Ignore unparseable or non-positive values.
        if let Some(value) = env {
            if let Ok(n) = value.trim().parse::<i64>() {
                if n > 0 {
                    return n as usize;
                }
            }
        }
        Self::detected_cpus().unwrap_or(DEFAULT_POOL_SIZE)
    }

    fn detected_cpus() -> Option<usize> {
        let count = num_cpus::get();
        (count > 0).then_some(count)
    }

    /// Attach a fresh [`TaskState`] to the task, enqueue it, and hand the
    /// shared state back for cancellation. Cannot fail: the queue is only
    /// stopped during teardown, after which the pool is unreachable.
    pub fn post(&self, task: PoolTask) -> Arc<TaskState> {
        tracing::trace!(category = ?task.details().category, "posting task to pool");
        let state = Arc::clone(task.state());
        let pushed = self.queue.push(task);
        assert!(pushed, "threadpool queue stopped before teardown");
        state
    }

    /// Number of queued (not yet claimed) tasks.
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Block until every posted task has completed.
    pub fn blocking_drain(&self) {
        self.queue.blocking_drain();
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Threadpool {
    fn drop(&mut self) {
        // Block future pushes, then take whatever is still queued so it is
        // dropped un-run (state stays Queued). Workers mid-task finish
        // first, then observe the stopped empty queue and exit.
        self.queue.stop();
        let dropped = self.queue.pop_all();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropping queued tasks at teardown");
        }
        drop(dropped);

        for worker in &mut self.workers {
            worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskDetails, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pool_task(f: impl FnOnce() + Send + 'static) -> PoolTask {
        PoolTask::new(Box::new(f), TaskDetails::unknown())
    }

    // ===== Size resolution =====

    #[test]
    fn test_explicit_size_wins() {
        assert_eq!(Threadpool::resolve_size(2, Some("8")), 2);
    }

    #[test]
    fn test_env_size_used_when_no_explicit() {
        assert_eq!(Threadpool::resolve_size(0, Some("8")), 8);
        assert_eq!(Threadpool::resolve_size(0, Some(" 3 ")), 3);
    }

    #[test]
    fn test_bad_env_values_ignored() {
        let detected = Threadpool::detected_cpus().unwrap_or(4);
        assert_eq!(Threadpool::resolve_size(0, Some("0")), detected);
        assert_eq!(Threadpool::resolve_size(0, Some("-4")), detected);
        assert_eq!(Threadpool::resolve_size(0, Some("lots")), detected);
    }

    #[test]
    fn test_cpu_count_fallback() {
        let detected = Threadpool::detected_cpus().unwrap_or(4);
        assert_eq!(Threadpool::resolve_size(0, None), detected);
        assert!(Threadpool::resolve_size(0, None) >= 1);
    }

    // ===== Execution =====

    #[test]
    fn test_pool_runs_tasks_and_drains() {
        let pool = Threadpool::new(2);
        assert_eq!(pool.worker_count(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let mut states = Vec::new();
        for _ in 0..16 {
            let counter = counter.clone();
            states.push(pool.post(pool_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }

        pool.blocking_drain();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        for state in states {
            assert_eq!(state.current(), TaskStatus::Completed);
        }
    }

    #[test]
    fn test_cancelled_task_not_run() {
        // A single gated worker guarantees the second task is still queued
        // when we cancel it.
        let pool = Threadpool::new(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        pool.post(pool_task(move || {
            gate_rx.recv().unwrap();
        }));

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let state = pool.post(pool_task(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(state.cancel());
        gate_tx.send(()).unwrap();
        pool.blocking_drain();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(state.current(), TaskStatus::Completed);
    }

    #[test]
    fn test_teardown_drops_queued_tasks() {
        let pool = Threadpool::new(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        pool.post(pool_task(move || {
            gate_rx.recv().unwrap();
        }));

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let state = pool.post(pool_task(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        // Release the gate from a helper thread so the drop can join.
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        drop(pool);
        releaser.join().unwrap();

        // The queued task was taken at teardown and never run.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(state.current(), TaskStatus::Queued);
    }
}
