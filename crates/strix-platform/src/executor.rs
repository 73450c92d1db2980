//! Loop-runtime work-submission adapter
//!
//! The external loop runtime hands work over as requests with optional
//! options; [`LoopExecutor`] wraps each request into a pool task and stashes
//! the task's shared [`TaskState`] in a cookie on the request so a later
//! cancel call can reach it. Whether the wrapping task runs, is skipped, or
//! is dropped at teardown, its destruction fires the request's done
//! callback, which is the loop runtime's completion notification.

use crate::pool::Threadpool;
use crate::task::{PoolTask, Task, TaskCategory, TaskDetails, TaskState};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Work categories a loop-runtime submission may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Filesystem work
    Fs,
    /// DNS resolution
    Dns,
    /// User-submitted I/O-bound work
    UserIo,
    /// User-submitted CPU-bound work
    UserCpu,
}

/// Options attached to a loop-runtime submission.
#[derive(Debug, Clone, Copy)]
pub struct WorkOptions {
    /// Declared kind of work
    pub kind: WorkKind,
    /// Submitter priority
    pub priority: i32,
    /// Whether the submission may be cancelled
    pub cancelable: bool,
}

/// Why a cancellation request was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    /// The request carries no cookie (never submitted, or already done).
    #[error("work request was never submitted")]
    InvalidRequest,
    /// The task is already running or completed.
    #[error("work request is already running or completed")]
    Busy,
}

// Negated errno values, matching the loop runtime's conventions.
const EINVAL: i32 = -22;
const EBUSY: i32 = -16;

impl CancelError {
    /// Integer code reported to the loop runtime.
    pub fn code(&self) -> i32 {
        match self {
            CancelError::InvalidRequest => EINVAL,
            CancelError::Busy => EBUSY,
        }
    }
}

/// A work request submitted by the loop runtime: the work itself, the done
/// notification, and the cookie slot the executor uses for cancellation.
pub struct WorkRequest {
    work: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    done: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    cookie: Mutex<Option<Arc<TaskState>>>,
}

impl WorkRequest {
    /// Create a request. `work` runs on a pool thread unless the request is
    /// cancelled first; `done` fires exactly once, when the wrapping task is
    /// destroyed.
    pub fn new(
        work: impl FnOnce() + Send + 'static,
        done: impl FnOnce() + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            work: Mutex::new(Some(Box::new(work))),
            done: Mutex::new(Some(Box::new(done))),
            cookie: Mutex::new(None),
        })
    }

    /// Whether a cancellation cookie is currently attached.
    pub fn has_cookie(&self) -> bool {
        self.cookie.lock().is_some()
    }
}

/// Work-submission vtable the loop runtime drives.
pub trait Executor: Send + Sync {
    /// One-time executor setup. The default does nothing.
    fn init(&self) {}

    /// Executor teardown. The default does nothing.
    fn destroy(&self) {}

    /// Submit a request. Must succeed; there is no failure channel back to
    /// the loop runtime.
    fn submit(&self, request: &Arc<WorkRequest>, options: Option<&WorkOptions>);

    /// Attempt to cancel a previously submitted request.
    fn cancel(&self, request: &Arc<WorkRequest>) -> Result<(), CancelError>;
}

// Wrapper delivered to the pool. Dropping it (after run, after a
// cancellation skip, or at teardown) detaches the cookie and signals done.
struct WorkTask {
    request: Arc<WorkRequest>,
}

impl Task for WorkTask {
    fn run(self: Box<Self>) {
        if let Some(work) = self.request.work.lock().take() {
            work();
        }
    }
}

impl Drop for WorkTask {
    fn drop(&mut self) {
        self.request.cookie.lock().take();
        if let Some(done) = self.request.done.lock().take() {
            done();
        }
    }
}

fn details_from_options(options: Option<&WorkOptions>) -> TaskDetails {
    match options {
        Some(options) => TaskDetails {
            category: match options.kind {
                WorkKind::Fs => TaskCategory::Filesystem,
                WorkKind::Dns => TaskCategory::Dns,
                WorkKind::UserIo => TaskCategory::UserIo,
                WorkKind::UserCpu => TaskCategory::UserCpu,
            },
            priority: options.priority,
            cancelable: options.cancelable,
        },
        None => TaskDetails::unknown(),
    }
}

/// Adapter translating loop-runtime submissions into pool tasks with
/// cancellable state.
pub struct LoopExecutor {
    pool: Arc<Threadpool>,
}

impl LoopExecutor {
    /// Build an executor posting to `pool`.
    pub fn new(pool: Arc<Threadpool>) -> Self {
        Self { pool }
    }
}

impl Executor for LoopExecutor {
    fn submit(&self, request: &Arc<WorkRequest>, options: Option<&WorkOptions>) {
        let details = details_from_options(options);
        tracing::trace!(category = ?details.category, "loop-runtime submission");

        let task = PoolTask::new(
            Box::new(WorkTask {
                request: Arc::clone(request),
            }),
            details,
        );
        let state = self.pool.post(task);
        *request.cookie.lock() = Some(state);
    }

    fn cancel(&self, request: &Arc<WorkRequest>) -> Result<(), CancelError> {
        let state = request
            .cookie
            .lock()
            .clone()
            .ok_or(CancelError::InvalidRequest)?;
        if state.cancel() {
            Ok(())
        } else {
            Err(CancelError::Busy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_details_mapping() {
        let options = WorkOptions {
            kind: WorkKind::Fs,
            priority: 7,
            cancelable: true,
        };
        let details = details_from_options(Some(&options));
        assert_eq!(details.category, TaskCategory::Filesystem);
        assert_eq!(details.priority, 7);
        assert!(details.cancelable);

        for (kind, category) in [
            (WorkKind::Dns, TaskCategory::Dns),
            (WorkKind::UserIo, TaskCategory::UserIo),
            (WorkKind::UserCpu, TaskCategory::UserCpu),
        ] {
            let details = details_from_options(Some(&WorkOptions {
                kind,
                priority: 0,
                cancelable: false,
            }));
            assert_eq!(details.category, category);
        }
    }

    #[test]
    fn test_missing_options_map_to_unknown() {
        let details = details_from_options(None);
        assert_eq!(details.category, TaskCategory::Unknown);
        assert_eq!(details.priority, -1);
        assert!(!details.cancelable);
    }

    #[test]
    fn test_cancel_codes() {
        assert_eq!(CancelError::InvalidRequest.code(), EINVAL);
        assert_eq!(CancelError::Busy.code(), EBUSY);
    }

    #[test]
    fn test_cancel_unsubmitted_request_is_invalid() {
        let pool = Arc::new(Threadpool::new(1));
        let executor = LoopExecutor::new(pool);

        let request = WorkRequest::new(|| {}, || {});
        assert_eq!(
            executor.cancel(&request),
            Err(CancelError::InvalidRequest)
        );
    }

    #[test]
    fn test_submit_runs_work_and_signals_done() {
        let pool = Arc::new(Threadpool::new(1));
        let executor = LoopExecutor::new(Arc::clone(&pool));

        let worked = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let work_flag = worked.clone();
        let done_flag = done.clone();
        let request = WorkRequest::new(
            move || work_flag.store(true, Ordering::SeqCst),
            move || done_flag.store(true, Ordering::SeqCst),
        );

        executor.submit(&request, None);
        pool.blocking_drain();

        assert!(worked.load(Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));
        // The wrapping task's destructor detached the cookie.
        assert!(!request.has_cookie());
    }

    #[test]
    fn test_cancel_before_pickup_skips_work() {
        // A gated single-worker pool keeps the submission queued while we
        // cancel it.
        let pool = Arc::new(Threadpool::new(1));
        let executor = LoopExecutor::new(Arc::clone(&pool));

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        pool.post(PoolTask::new(
            Box::new(move || gate_rx.recv().unwrap()),
            TaskDetails::unknown(),
        ));

        let worked = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let work_flag = worked.clone();
        let done_flag = done.clone();
        let request = WorkRequest::new(
            move || work_flag.store(true, Ordering::SeqCst),
            move || done_flag.store(true, Ordering::SeqCst),
        );

        executor.submit(
            &request,
            Some(&WorkOptions {
                kind: WorkKind::UserCpu,
                priority: 0,
                cancelable: true,
            }),
        );
        assert!(executor.cancel(&request).is_ok());

        gate_tx.send(()).unwrap();
        pool.blocking_drain();

        assert!(!worked.load(Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));

        // The cookie was detached when the wrapper was destroyed, so a
        // late cancel is an invalid request.
        assert_eq!(executor.cancel(&request), Err(CancelError::InvalidRequest));
    }

    #[test]
    fn test_cancel_while_running_succeeds_cooperatively() {
        let pool = Arc::new(Threadpool::new(1));
        let executor = LoopExecutor::new(Arc::clone(&pool));

        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(0);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        let request = WorkRequest::new(
            move || {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
                finished_flag.store(true, Ordering::SeqCst);
            },
            || {},
        );

        executor.submit(&request, None);
        started_rx.recv().unwrap();

        // Assigned -> Cancelled is a legal edge, so the cancel reports
        // success, but the running work is not interrupted.
        assert!(executor.cancel(&request).is_ok());
        gate_tx.send(()).unwrap();
        pool.blocking_drain();
        assert!(finished.load(Ordering::SeqCst));
    }
}
