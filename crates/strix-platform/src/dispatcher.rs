//! Delayed dispatch onto the worker pool
//!
//! A dedicated thread owns a private [`EventLoop`]. Any thread may submit a
//! (task, delay) pair; the submission travels over a command channel, the
//! loop's wakeup handle is signalled, and the dispatch thread arms a one-shot
//! timer. When the timer fires the task is wrapped with engine details and
//! posted to the pool. Nothing but the dispatch thread ever touches the loop
//! or the timer set.

use crate::event_loop::{AsyncHandle, EventLoop, RunMode, TimerHandle};
use crate::pool::Threadpool;
use crate::task::{PoolTask, Task};
use crate::time::delay_to_millis;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Command {
    Schedule {
        task: Box<dyn Task>,
        delay_seconds: f64,
    },
    Stop,
}

type WakeupSlot = Arc<Mutex<Option<AsyncHandle>>>;

/// Accepts delayed worker submissions from any thread and posts them to the
/// [`Threadpool`] once their delay expires.
pub struct DelayedDispatcher {
    commands: Sender<Command>,
    wakeup: WakeupSlot,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedDispatcher {
    /// Spawn the dispatch thread. Returns once the thread has initialized
    /// its loop and wakeup handle, so submissions are valid immediately.
    pub fn start(pool: Arc<Threadpool>) -> Self {
        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("strix-delay-sched".to_string())
            .spawn(move || Self::scheduler_loop(pool, command_rx, ready_tx))
            .expect("failed to spawn delayed-task scheduler thread");

        let wakeup = ready_rx
            .recv()
            .expect("delayed-task scheduler failed to initialize");

        Self {
            commands: command_tx,
            wakeup,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Schedule `task` to be posted to the pool `delay_seconds` from now.
    /// Submissions racing a [`DelayedDispatcher::stop`] are silently dropped.
    pub fn post_delayed(&self, task: Box<dyn Task>, delay_seconds: f64) {
        tracing::trace!(delay_seconds, "scheduling delayed worker task");
        let _ = self.commands.send(Command::Schedule {
            task,
            delay_seconds,
        });
        if let Some(handle) = self.wakeup.lock().as_ref() {
            handle.send();
        }
    }

    /// Stop the dispatch thread, dropping every in-flight delayed task, and
    /// join it. Idempotent.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.wakeup.lock().as_ref() {
            handle.send();
        }
        if let Some(thread) = self.thread.lock().take() {
            thread
                .join()
                .expect("delayed-task scheduler thread panicked");
        }
    }

    fn scheduler_loop(
        pool: Arc<Threadpool>,
        commands: Receiver<Command>,
        ready: Sender<WakeupSlot>,
    ) {
        let event_loop = EventLoop::new();
        let timers: Arc<Mutex<FxHashMap<u64, TimerHandle>>> =
            Arc::new(Mutex::new(FxHashMap::default()));
        let wakeup: WakeupSlot = Arc::new(Mutex::new(None));

        let flush = {
            let event_loop = Arc::clone(&event_loop);
            let timers = Arc::clone(&timers);
            let wakeup = Arc::clone(&wakeup);
            move || {
                while let Ok(command) = commands.try_recv() {
                    match command {
                        Command::Schedule {
                            task,
                            delay_seconds,
                        } => {
                            let timeout = Duration::from_millis(delay_to_millis(delay_seconds));
                            let timer = event_loop.timer();
                            let id = timer.id();
                            let timer_set = Arc::clone(&timers);
                            let pool = Arc::clone(&pool);
                            timer.start(timeout, move || {
                                // Ready: take the timer out of the set and
                                // hand the task to the pool.
                                timer_set.lock().remove(&id);
                                pool.post(PoolTask::engine(task));
                            });
                            timers.lock().insert(id, timer);
                        }
                        Command::Stop => {
                            let dropped: Vec<TimerHandle> =
                                timers.lock().drain().map(|(_, timer)| timer).collect();
                            if !dropped.is_empty() {
                                tracing::debug!(
                                    count = dropped.len(),
                                    "dropping in-flight delayed tasks at dispatcher stop"
                                );
                            }
                            drop(dropped);
                            // Closing the wakeup handle lets the loop exit.
                            *wakeup.lock() = None;
                            return;
                        }
                    }
                }
            }
        };

        let handle = event_loop.register_async(flush);
        *wakeup.lock() = Some(handle);
        ready
            .send(Arc::clone(&wakeup))
            .expect("dispatcher creator went away during startup");

        event_loop.run(RunMode::Default);
        tracing::debug!("delayed-task scheduler exiting");
    }
}

impl Drop for DelayedDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
