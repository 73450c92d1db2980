//! Per-engine foreground task running
//!
//! Each registered engine instance gets a [`PerLoopRunner`] bound to the
//! event loop that owns it. Any thread may post; execution always happens on
//! the loop thread, either via the runner's wakeup handle or through an
//! explicit [`PerLoopRunner::flush`]. Delayed foreground tasks are parked on
//! unreferenced loop timers owned solely by the runner, so they never keep
//! the loop alive on their own and can be cancelled wholesale.

use crate::event_loop::{AsyncHandle, EventLoop, TimerHandle};
use crate::queue::FlushQueue;
use crate::task::Task;
use crate::time::delay_to_millis;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Engine-facing surface of a foreground runner.
pub trait TaskRunner: Send + Sync {
    /// Post a task for execution on the owning loop's thread.
    fn post_task(&self, task: Box<dyn Task>);

    /// Post a task to run on the owning loop's thread no sooner than
    /// `delay_seconds` from now.
    fn post_delayed_task(&self, task: Box<dyn Task>, delay_seconds: f64);

    /// Idle tasks are unsupported; posting one is a contract violation.
    fn post_idle_task(&self, _task: Box<dyn Task>) {
        unreachable!("idle tasks are not supported");
    }

    /// Always false.
    fn idle_tasks_enabled(&self) -> bool {
        false
    }
}

struct ForegroundDelayed {
    task: Box<dyn Task>,
    delay_seconds: f64,
}

/// Foreground task runner for one engine instance.
pub struct PerLoopRunner {
    event_loop: Arc<EventLoop>,
    /// Wakeup handle; `None` after shutdown.
    flush_tasks: Mutex<Option<AsyncHandle>>,
    foreground_tasks: FlushQueue<Box<dyn Task>>,
    foreground_delayed: FlushQueue<ForegroundDelayed>,
    /// Timer-backed delayed tasks, armed and fired on the loop thread only.
    scheduled_delayed: Mutex<FxHashMap<u64, TimerHandle>>,
    refs: AtomicUsize,
    weak_self: Weak<PerLoopRunner>,
}

impl PerLoopRunner {
    /// Create a runner on `event_loop` and register its wakeup handle. The
    /// handle is unreferenced so the runner alone never keeps the loop alive.
    pub fn new(event_loop: Arc<EventLoop>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self: &Weak<PerLoopRunner>| {
            let weak = weak_self.clone();
            let handle = event_loop.register_async(move || {
                if let Some(runner) = weak.upgrade() {
                    runner.flush();
                }
            });
            handle.unref();

            Self {
                event_loop,
                flush_tasks: Mutex::new(Some(handle)),
                foreground_tasks: FlushQueue::new(),
                foreground_delayed: FlushQueue::new(),
                scheduled_delayed: Mutex::new(FxHashMap::default()),
                refs: AtomicUsize::new(1),
                weak_self: weak_self.clone(),
            }
        })
    }

    /// The loop this runner posts to.
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Queue a task and wake the owning loop.
    pub fn post(&self, task: Box<dyn Task>) {
        let guard = self.flush_tasks.lock();
        let handle = guard
            .as_ref()
            .expect("posting to a foreground runner after shutdown");
        self.foreground_tasks.push(task);
        handle.send();
    }

    /// Queue a delayed task and wake the owning loop; the timer is armed
    /// during the next flush, on the loop thread.
    pub fn post_delayed(&self, task: Box<dyn Task>, delay_seconds: f64) {
        let guard = self.flush_tasks.lock();
        let handle = guard
            .as_ref()
            .expect("posting to a foreground runner after shutdown");
        self.foreground_delayed.push(ForegroundDelayed {
            task,
            delay_seconds,
        });
        handle.send();
    }

    /// Flush pending work on the calling thread, which must be the owning
    /// loop's thread (the wakeup callback guarantees this; the platform's
    /// direct calls are the host's responsibility).
    ///
    /// Delayed tasks drained here are parked on fresh one-shot timers; plain
    /// tasks are snapshotted and run in post order. Tasks posted while the
    /// snapshot runs are left for a subsequent wakeup. Returns whether any
    /// timer was armed or any task ran.
    pub fn flush(&self) -> bool {
        let mut did_work = false;

        for delayed in self.foreground_delayed.pop_all() {
            did_work = true;
            let timeout = Duration::from_millis(delay_to_millis(delayed.delay_seconds));
            let timer = self.event_loop.timer();
            let id = timer.id();
            let weak = self.weak_self.clone();
            let task = delayed.task;
            timer.start(timeout, move || {
                task.run();
                if let Some(runner) = weak.upgrade() {
                    runner.scheduled_delayed.lock().remove(&id);
                }
            });
            timer.unref();
            self.scheduled_delayed.lock().insert(id, timer);
        }

        for task in self.foreground_tasks.pop_all() {
            did_work = true;
            task.run();
        }

        did_work
    }

    /// Drop every timer-backed delayed task that has not fired yet.
    pub fn cancel_pending_delayed(&self) {
        let dropped = std::mem::take(&mut *self.scheduled_delayed.lock());
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "cancelling pending delayed tasks");
        }
        drop(dropped);
    }

    /// Number of armed, not-yet-fired delayed tasks (for tests and stats).
    pub fn scheduled_delayed_count(&self) -> usize {
        self.scheduled_delayed.lock().len()
    }

    /// Flush until idle, cancel pending delayed tasks, and close the wakeup
    /// handle. Idempotent; posting afterwards is a contract violation.
    pub fn shutdown(&self) {
        if self.flush_tasks.lock().is_none() {
            return;
        }
        while self.flush() {}
        self.cancel_pending_delayed();
        drop(self.flush_tasks.lock().take());
        tracing::debug!("foreground runner shut down");
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one registration reference, returning the remaining count.
    pub(crate) fn release(&self) -> usize {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "foreground runner released too many times");
        previous - 1
    }
}

impl TaskRunner for PerLoopRunner {
    fn post_task(&self, task: Box<dyn Task>) {
        self.post(task);
    }

    fn post_delayed_task(&self, task: Box<dyn Task>, delay_seconds: f64) {
        self.post_delayed(task, delay_seconds);
    }
}

impl Drop for PerLoopRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
