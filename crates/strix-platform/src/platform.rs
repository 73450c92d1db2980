//! Top-level platform object
//!
//! The [`Platform`] is what the host hands to its embedded engines: it
//! routes worker tasks to the shared pool (directly or via the delayed
//! dispatcher) and foreground tasks to the [`PerLoopRunner`] registered for
//! the posting engine. Engine instances may be registered multiple times;
//! their runner lives until the registrations are balanced by
//! unregistrations.

use crate::event_loop::EventLoop;
use crate::foreground::PerLoopRunner;
use crate::pool::Threadpool;
use crate::runner::WorkerTaskRunner;
use crate::task::{Task, TaskState};
use crate::time::wall_clock_millis;
use crate::trace::TracingController;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Opaque identity of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-tier scheduler surface for embedded engines.
pub struct Platform {
    worker_runner: WorkerTaskRunner,
    per_engine: Mutex<FxHashMap<EngineId, Arc<PerLoopRunner>>>,
    tracing_controller: Arc<TracingController>,
    started_at: Instant,
}

impl Platform {
    /// Build a platform on a shared pool with a default tracing controller.
    pub fn new(pool: Arc<Threadpool>) -> Self {
        Self::with_tracing_controller(pool, Arc::new(TracingController::new()))
    }

    /// Build a platform on a shared pool with the given tracing controller.
    pub fn with_tracing_controller(
        pool: Arc<Threadpool>,
        tracing_controller: Arc<TracingController>,
    ) -> Self {
        Self {
            worker_runner: WorkerTaskRunner::new(pool),
            per_engine: Mutex::new(FxHashMap::default()),
            tracing_controller,
            started_at: Instant::now(),
        }
    }

    /// Register an engine instance running on `event_loop`. Re-registering
    /// the same instance bumps its runner's refcount; the loop must match
    /// the one it was first registered with.
    pub fn register_engine(&self, engine: EngineId, event_loop: &Arc<EventLoop>) {
        let mut map = self.per_engine.lock();
        if let Some(existing) = map.get(&engine) {
            assert!(
                Arc::ptr_eq(existing.event_loop(), event_loop),
                "engine re-registered with a different loop"
            );
            existing.add_ref();
        } else {
            tracing::debug!(engine = engine.as_u64(), "registering engine");
            map.insert(engine, PerLoopRunner::new(Arc::clone(event_loop)));
        }
    }

    /// Balance one [`Platform::register_engine`] call. When the last
    /// registration is released the runner is shut down and removed.
    pub fn unregister_engine(&self, engine: EngineId) {
        let mut map = self.per_engine.lock();
        let runner = map
            .get(&engine)
            .expect("unregistering an engine that is not registered");
        if runner.release() == 0 {
            tracing::debug!(engine = engine.as_u64(), "unregistering engine");
            runner.shutdown();
            map.remove(&engine);
        }
    }

    /// Stop the delayed dispatcher and drop every foreground runner.
    pub fn shutdown(&self) {
        self.worker_runner.shutdown();
        self.per_engine.lock().clear();
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_runner.worker_count()
    }

    /// Post a task to run on any worker thread.
    pub fn call_on_worker(&self, task: Box<dyn Task>) -> Arc<TaskState> {
        self.worker_runner.post(task)
    }

    /// Post a task to run on any worker thread no sooner than
    /// `delay_seconds` from now.
    pub fn call_delayed_on_worker(&self, task: Box<dyn Task>, delay_seconds: f64) {
        self.worker_runner.post_delayed(task, delay_seconds);
    }

    /// Post a task to run on the engine's loop thread.
    pub fn call_on_foreground(&self, engine: EngineId, task: Box<dyn Task>) {
        self.for_engine(engine).post(task);
    }

    /// Post a delayed task to run on the engine's loop thread.
    pub fn call_delayed_on_foreground(
        &self,
        engine: EngineId,
        task: Box<dyn Task>,
        delay_seconds: f64,
    ) {
        self.for_engine(engine).post_delayed(task, delay_seconds);
    }

    /// The engine's foreground runner handle.
    pub fn foreground_runner(&self, engine: EngineId) -> Arc<PerLoopRunner> {
        self.for_engine(engine)
    }

    /// Drain worker tasks and flush the engine's foreground work until both
    /// are idle. Must be called on the engine's loop thread.
    pub fn drain_tasks(&self, engine: EngineId) {
        let runner = self.for_engine(engine);
        loop {
            // Worker tasks are not associated with any particular engine.
            self.worker_runner.blocking_drain();
            if !runner.flush() {
                break;
            }
        }
    }

    /// Flush the engine's foreground work on the calling thread.
    pub fn flush_foreground(&self, engine: EngineId) -> bool {
        self.for_engine(engine).flush()
    }

    /// Drop the engine's pending timer-backed delayed tasks.
    pub fn cancel_pending_delayed(&self, engine: EngineId) {
        self.for_engine(engine).cancel_pending_delayed();
    }

    /// Idle tasks are never supported.
    pub fn idle_tasks_enabled(&self, _engine: EngineId) -> bool {
        false
    }

    /// Seconds on a high-resolution monotonic clock.
    pub fn monotonic_time(&self) -> f64 {
        self.started_at.elapsed().as_nanos() as f64 / 1e9
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn current_clock_millis(&self) -> f64 {
        wall_clock_millis()
    }

    /// The shared tracing sink handle.
    pub fn tracing_controller(&self) -> Arc<TracingController> {
        Arc::clone(&self.tracing_controller)
    }

    fn for_engine(&self, engine: EngineId) -> Arc<PerLoopRunner> {
        self.per_engine
            .lock()
            .get(&engine)
            .cloned()
            .expect("engine is not registered")
    }
}
