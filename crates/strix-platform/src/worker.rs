//! Worker thread that executes pool tasks

use crate::queue::TaskQueue;
use crate::task::TaskStatus;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A single OS thread popping the shared [`TaskQueue`] and executing tasks,
/// honoring cancellation.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker bound to `queue`. The worker exits once the queue is
    /// stopped and empty.
    pub fn start(id: usize, queue: Arc<TaskQueue>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("strix-worker-{id}"))
            .spawn(move || Self::run_loop(id, queue))
            .expect("failed to spawn worker thread");
        Self {
            id,
            handle: Some(handle),
        }
    }

    fn run_loop(id: usize, queue: Arc<TaskQueue>) {
        tracing::debug!(worker = id, "worker started");
        while let Some(task) = queue.blocking_pop() {
            let state = Arc::clone(task.state());

            // May have been cancelled while queued.
            let status = state.try_transition(TaskStatus::Assigned);
            if status == TaskStatus::Assigned {
                task.run();
            } else {
                assert_eq!(status, TaskStatus::Cancelled);
                tracing::trace!(worker = id, "skipping cancelled task");
                drop(task);
            }

            // Legal from both Assigned and Cancelled, so this always lands.
            assert_eq!(
                state.try_transition(TaskStatus::Completed),
                TaskStatus::Completed
            );
            queue.notify_complete();
        }
        tracing::debug!(worker = id, "worker exiting");
    }

    /// The worker's index within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Join the worker thread. Call only after stopping the queue.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PoolTask, TaskDetails};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_executes_task() {
        let queue = Arc::new(TaskQueue::new());
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let task = PoolTask::new(
            Box::new(move || flag.store(true, Ordering::SeqCst)),
            TaskDetails::unknown(),
        );
        let state = task.state().clone();
        queue.push(task);

        let mut worker = Worker::start(0, queue.clone());
        queue.blocking_drain();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(state.current(), TaskStatus::Completed);

        queue.stop();
        worker.join();
    }

    #[test]
    fn test_worker_skips_cancelled_task() {
        let queue = Arc::new(TaskQueue::new());
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let task = PoolTask::new(
            Box::new(move || flag.store(true, Ordering::SeqCst)),
            TaskDetails::unknown(),
        );
        let state = task.state().clone();
        queue.push(task);
        assert!(state.cancel());

        let mut worker = Worker::start(0, queue.clone());
        queue.blocking_drain();

        // The worker observed the cancellation, skipped run(), and still
        // drove the state to Completed.
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(state.current(), TaskStatus::Completed);

        queue.stop();
        worker.join();
    }

    #[test]
    fn test_worker_exits_on_stop() {
        let queue = Arc::new(TaskQueue::new());
        let mut worker = Worker::start(0, queue.clone());

        std::thread::sleep(Duration::from_millis(20));
        queue.stop();
        worker.join();
    }
}
