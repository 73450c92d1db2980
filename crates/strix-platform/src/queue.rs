//! Task queues
//!
//! Two FIFOs live here. [`TaskQueue`] is the worker pool's queue: it tracks
//! outstanding work for drain waits and refuses pushes once stopped.
//! [`FlushQueue`] is the small multi-producer FIFO the foreground runner
//! snapshots with `pop_all`.

use crate::task::{PoolTask, TaskStatus};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueInner {
    queue: VecDeque<PoolTask>,
    outstanding: usize,
    stopped: bool,
}

/// Multi-producer/multi-consumer FIFO of pending pool tasks with drain and
/// stop semantics.
///
/// `outstanding` counts tasks from push until the executing worker calls
/// [`TaskQueue::notify_complete`], so it is never less than the queue length.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    task_available: Condvar,
    tasks_drained: Condvar,
}

impl TaskQueue {
    /// Create an empty, running queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                outstanding: 0,
                stopped: false,
            }),
            task_available: Condvar::new(),
            tasks_drained: Condvar::new(),
        }
    }

    /// Enqueue a task, transitioning it to `Queued` and waking one waiter.
    ///
    /// Returns false without enqueueing once the queue has been stopped.
    /// A task already cancelled at push time is kept anyway; the popping
    /// worker will observe the cancellation and skip it.
    pub fn push(&self, task: PoolTask) -> bool {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return false;
        }

        let status = task.try_transition(TaskStatus::Queued);
        assert!(
            matches!(status, TaskStatus::Queued | TaskStatus::Cancelled),
            "pushed task in unexpected state {status:?}"
        );

        inner.queue.push_back(task);
        inner.outstanding += 1;
        self.task_available.notify_one();
        true
    }

    /// Non-blocking pop of the front task.
    pub fn try_pop(&self) -> Option<PoolTask> {
        self.inner.lock().queue.pop_front()
    }

    /// Wait until the queue is non-empty or stopped, then pop.
    ///
    /// Returns `None` only when the queue is stopped and empty; elements
    /// pushed before the stop remain poppable until drained.
    pub fn blocking_pop(&self) -> Option<PoolTask> {
        let mut inner = self.inner.lock();
        while inner.queue.is_empty() && !inner.stopped {
            self.task_available.wait(&mut inner);
        }
        inner.queue.pop_front()
    }

    /// Record completion of a previously pushed task; broadcasts the drained
    /// condition when the outstanding count reaches zero.
    pub fn notify_complete(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.outstanding > 0, "completion without outstanding task");
        inner.outstanding -= 1;
        if inner.outstanding == 0 {
            tracing::trace!("task queue fully drained");
            self.tasks_drained.notify_all();
        }
    }

    /// Block until every pushed task has completed.
    pub fn blocking_drain(&self) {
        let mut inner = self.inner.lock();
        while inner.outstanding > 0 {
            self.tasks_drained.wait(&mut inner);
        }
    }

    /// Refuse further pushes and wake every blocked popper.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        self.task_available.notify_all();
    }

    /// Current number of queued (not yet popped) tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Atomically move the entire contents out.
    pub fn pop_all(&self) -> VecDeque<PoolTask> {
        std::mem::take(&mut self.inner.lock().queue)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-producer FIFO snapshotted wholesale by its consumer.
pub struct FlushQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> FlushQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Pop the front item, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Atomically move the entire contents out. Items pushed afterwards land
    /// in a fresh queue and are not part of the snapshot.
    pub fn pop_all(&self) -> VecDeque<T> {
        std::mem::take(&mut self.inner.lock())
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T> Default for FlushQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
