//! Cooperative event loop primitives
//!
//! The scheduler core consumes exactly two primitives from "the loop": an
//! async-wakeup handle that any thread may signal, and one-shot timers. This
//! module provides both on a minimal cooperative loop owned by whichever
//! thread calls [`EventLoop::run`].
//!
//! Handle semantics follow the usual event-loop conventions: a loop running
//! in [`RunMode::Default`] stays alive while at least one *referenced* handle
//! is live, `unref` removes a handle from that accounting without disabling
//! it, and dropping a handle closes it. Callbacks always run on the loop
//! thread, with no internal lock held.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type AsyncCallback = Arc<dyn Fn() + Send + Sync>;
type TimerCallback = Box<dyn FnOnce() + Send>;

/// How long [`EventLoop::run`] keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until no referenced live handle remains (or [`EventLoop::stop`]).
    Default,
    /// Run at least one batch of callbacks, blocking for it if necessary.
    Once,
    /// Run whatever is already due, then return immediately.
    NoWait,
}

struct AsyncSlot {
    callback: AsyncCallback,
    pending: bool,
    referenced: bool,
}

struct TimerSlot {
    callback: Option<TimerCallback>,
    deadline: Option<Instant>,
    referenced: bool,
    generation: u64,
}

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    id: u64,
}

// Reversed comparisons turn the std max-heap into a min-heap; the generation
// tie-break keeps equal deadlines in arming order.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

struct LoopState {
    asyncs: FxHashMap<u64, AsyncSlot>,
    timers: FxHashMap<u64, TimerSlot>,
    deadlines: BinaryHeap<TimerEntry>,
    next_id: u64,
    next_generation: u64,
    stopped: bool,
}

/// A cooperative event loop providing async wakeups and one-shot timers.
pub struct EventLoop {
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

impl EventLoop {
    /// Create a loop with no handles.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoopState {
                asyncs: FxHashMap::default(),
                timers: FxHashMap::default(),
                deadlines: BinaryHeap::new(),
                next_id: 0,
                next_generation: 0,
                stopped: false,
            }),
            wakeup: Condvar::new(),
        })
    }

    /// Register an async-wakeup handle. `callback` runs on the loop thread
    /// after each [`AsyncHandle::send`]; coalesced signals may collapse into
    /// a single invocation.
    pub fn register_async(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> AsyncHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.asyncs.insert(
            id,
            AsyncSlot {
                callback: Arc::new(callback),
                pending: false,
                referenced: true,
            },
        );
        AsyncHandle {
            id,
            event_loop: Arc::clone(self),
        }
    }

    /// Allocate a timer handle. The timer does nothing until
    /// [`TimerHandle::start`] arms it.
    pub fn timer(self: &Arc<Self>) -> TimerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            TimerSlot {
                callback: None,
                deadline: None,
                referenced: true,
                generation: 0,
            },
        );
        TimerHandle {
            id,
            event_loop: Arc::clone(self),
        }
    }

    /// Drive the loop on the calling thread. Returns whether referenced live
    /// handles remain.
    pub fn run(&self, mode: RunMode) -> bool {
        loop {
            let did_work = self.run_due();

            let mut state = self.state.lock();
            if state.stopped {
                state.stopped = false;
                return Self::alive(&state);
            }
            match mode {
                RunMode::NoWait => return Self::alive(&state),
                RunMode::Once if did_work => return Self::alive(&state),
                RunMode::Default if !Self::alive(&state) => return false,
                _ => {}
            }
            if Self::has_pending_async(&state) {
                continue;
            }

            match Self::next_deadline(&state) {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        self.wakeup.wait_for(&mut state, deadline - now);
                    }
                }
                None => {
                    if mode == RunMode::Once && state.asyncs.is_empty() {
                        // Nothing armed and nothing that could be signalled.
                        return Self::alive(&state);
                    }
                    self.wakeup.wait(&mut state);
                }
            }
        }
    }

    /// Make the current (or next) [`EventLoop::run`] call return.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.wakeup.notify_all();
    }

    // Run expired timers in deadline order, then pending async callbacks.
    // Callbacks execute with the state lock released so they may freely arm
    // timers, signal handles, or close themselves.
    fn run_due(&self) -> bool {
        let mut ran = false;

        loop {
            let now = Instant::now();
            let mut state = self.state.lock();
            let mut fired: Option<TimerCallback> = None;
            while let Some(top) = state.deadlines.peek() {
                if top.deadline > now {
                    break;
                }
                let entry = state.deadlines.pop().unwrap();
                if let Some(slot) = state.timers.get_mut(&entry.id) {
                    // Skip stale heap entries left by stop() or a restart.
                    if slot.generation == entry.generation && slot.deadline.is_some() {
                        slot.deadline = None;
                        fired = slot.callback.take();
                        break;
                    }
                }
            }
            drop(state);

            match fired {
                Some(callback) => {
                    callback();
                    ran = true;
                }
                None => break,
            }
        }

        loop {
            let mut state = self.state.lock();
            let callback = state.asyncs.values_mut().find(|slot| slot.pending).map(|slot| {
                slot.pending = false;
                Arc::clone(&slot.callback)
            });
            drop(state);

            match callback {
                Some(callback) => {
                    callback();
                    ran = true;
                }
                None => break,
            }
        }

        ran
    }

    fn alive(state: &LoopState) -> bool {
        state.asyncs.values().any(|slot| slot.referenced)
            || state
                .timers
                .values()
                .any(|slot| slot.referenced && slot.deadline.is_some())
    }

    fn has_pending_async(state: &LoopState) -> bool {
        state.asyncs.values().any(|slot| slot.pending)
    }

    fn next_deadline(state: &LoopState) -> Option<Instant> {
        state.timers.values().filter_map(|slot| slot.deadline).min()
    }
}

/// Wakeup handle registered on an [`EventLoop`]. Signalled from any thread;
/// the callback runs on the loop thread. Dropping the handle closes it.
pub struct AsyncHandle {
    id: u64,
    event_loop: Arc<EventLoop>,
}

impl AsyncHandle {
    /// Mark the handle pending and wake the loop.
    pub fn send(&self) {
        let mut state = self.event_loop.state.lock();
        if let Some(slot) = state.asyncs.get_mut(&self.id) {
            slot.pending = true;
        }
        drop(state);
        self.event_loop.wakeup.notify_all();
    }

    /// Remove this handle from the loop's keep-alive accounting.
    pub fn unref(&self) {
        let mut state = self.event_loop.state.lock();
        if let Some(slot) = state.asyncs.get_mut(&self.id) {
            slot.referenced = false;
        }
        drop(state);
        self.event_loop.wakeup.notify_all();
    }
}

impl Drop for AsyncHandle {
    fn drop(&mut self) {
        self.event_loop.state.lock().asyncs.remove(&self.id);
        self.event_loop.wakeup.notify_all();
    }
}

/// One-shot timer on an [`EventLoop`]. Dropping the handle closes the timer,
/// discarding an un-fired callback.
pub struct TimerHandle {
    id: u64,
    event_loop: Arc<EventLoop>,
}

impl TimerHandle {
    /// Opaque identity of this timer on its loop.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Arm the timer to fire once after `timeout`. Re-arming replaces any
    /// previously scheduled fire.
    pub fn start(&self, timeout: Duration, callback: impl FnOnce() + Send + 'static) {
        let deadline = Instant::now() + timeout;
        let mut state = self.event_loop.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        if let Some(slot) = state.timers.get_mut(&self.id) {
            slot.callback = Some(Box::new(callback));
            slot.deadline = Some(deadline);
            slot.generation = generation;
            state.deadlines.push(TimerEntry {
                deadline,
                generation,
                id: self.id,
            });
        }
        drop(state);
        self.event_loop.wakeup.notify_all();
    }

    /// Disarm the timer, discarding its pending callback.
    pub fn stop(&self) {
        let mut state = self.event_loop.state.lock();
        if let Some(slot) = state.timers.get_mut(&self.id) {
            slot.deadline = None;
            slot.callback = None;
        }
        drop(state);
        self.event_loop.wakeup.notify_all();
    }

    /// Remove this timer from the loop's keep-alive accounting.
    pub fn unref(&self) {
        let mut state = self.event_loop.state.lock();
        if let Some(slot) = state.timers.get_mut(&self.id) {
            slot.referenced = false;
        }
        drop(state);
        self.event_loop.wakeup.notify_all();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.event_loop.state.lock().timers.remove(&self.id);
        self.event_loop.wakeup.notify_all();
    }
}
