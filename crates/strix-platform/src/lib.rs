//! Strix platform layer
//!
//! This crate implements the scheduling layer a host process installs
//! between an embedded script engine and its event loops:
//! - **Worker tasks** run on a fixed-size thread pool, in parallel with the
//!   host's loop threads (`pool`, `worker`, `queue` modules).
//! - **Foreground tasks** run on the loop thread owning a particular engine
//!   instance, immediately or after a delay (`foreground` module).
//! - **Delayed worker tasks** traverse a dedicated dispatch thread that arms
//!   timers on a private loop and posts expired tasks to the pool
//!   (`dispatcher` module).
//! - A **loop-runtime executor** adapts external work submissions onto the
//!   pool with cancellable per-task state (`executor` module).
//!
//! The [`Platform`] ties these together and is the object engines talk to.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strix_platform::{EngineId, EventLoop, Platform, Threadpool};
//!
//! let pool = Arc::new(Threadpool::new(4));
//! let platform = Platform::new(pool);
//!
//! // Worker tier: runs on some pool thread.
//! platform.call_on_worker(Box::new(|| {
//!     // CPU- or I/O-bound work
//! }));
//!
//! // Foreground tier: runs on the engine's loop thread during a flush.
//! let engine = EngineId::new();
//! let event_loop = EventLoop::new();
//! platform.register_engine(engine, &event_loop);
//! platform.call_on_foreground(engine, Box::new(|| {
//!     // touches engine state, so it must run on the loop thread
//! }));
//! platform.flush_foreground(engine);
//!
//! platform.unregister_engine(engine);
//! platform.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod dispatcher;
pub mod event_loop;
pub mod executor;
pub mod foreground;
pub mod platform;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod task;
pub mod time;
pub mod trace;
pub mod worker;

pub use dispatcher::DelayedDispatcher;
pub use event_loop::{AsyncHandle, EventLoop, RunMode, TimerHandle};
pub use executor::{CancelError, Executor, LoopExecutor, WorkKind, WorkOptions, WorkRequest};
pub use foreground::{PerLoopRunner, TaskRunner};
pub use platform::{EngineId, Platform};
pub use pool::{Threadpool, POOL_SIZE_ENV};
pub use queue::{FlushQueue, TaskQueue};
pub use runner::WorkerTaskRunner;
pub use task::{PoolTask, Task, TaskCategory, TaskDetails, TaskState, TaskStatus};
pub use time::delay_to_millis;
pub use trace::TracingController;
pub use worker::Worker;
