//! Task model and lifecycle state machine
//!
//! A task is a run-once action paired with an immutable details record and a
//! shared [`TaskState`]. The state object is the cancellation rendezvous:
//! producers, the queue, the executing worker, and any external cancel handle
//! all observe and drive the same mutex-guarded state machine.

use parking_lot::Mutex;
use std::sync::Arc;

/// A unit of deferred work.
///
/// The action runs at most once; ownership of the boxed task transfers to
/// whichever component ends up running (or dropping) it.
pub trait Task: Send {
    /// Execute the task, consuming it.
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Task for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Category a submission declares about itself, used for routing decisions
/// and trace annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    /// Filesystem work
    Filesystem,
    /// DNS resolution work
    Dns,
    /// User-submitted I/O-bound work
    UserIo,
    /// User-submitted CPU-bound work
    UserCpu,
    /// Work posted by the embedded engine itself
    Engine,
    /// Anything else
    Unknown,
}

/// Immutable metadata attached to every pool submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDetails {
    /// What kind of work this is
    pub category: TaskCategory,
    /// Submitter-declared priority; -1 when unspecified
    pub priority: i32,
    /// Whether the submitter may cancel this task
    pub cancelable: bool,
}

impl TaskDetails {
    /// Details for tasks posted by the engine itself.
    pub fn engine() -> Self {
        Self {
            category: TaskCategory::Engine,
            priority: -1,
            cancelable: false,
        }
    }

    /// Details for submissions that carried no options.
    pub fn unknown() -> Self {
        Self {
            category: TaskCategory::Unknown,
            priority: -1,
            cancelable: false,
        }
    }
}

/// Lifecycle stage of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not yet queued
    Initial,
    /// Sitting in a queue
    Queued,
    /// Claimed by a worker
    Assigned,
    /// Cancelled before (or during) execution
    Cancelled,
    /// Terminal: the worker is done with it
    Completed,
}

/// Thread-safe lifecycle state machine for a single task.
///
/// Shared between the task itself and any holder wishing to cancel it.
/// Transitions not in the legal table are no-ops that report the unchanged
/// state, so racing callers always observe a consistent walk of the graph.
pub struct TaskState {
    state: Mutex<TaskStatus>,
}

impl TaskState {
    /// Create a state machine in [`TaskStatus::Initial`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskStatus::Initial),
        }
    }

    /// Current state.
    pub fn current(&self) -> TaskStatus {
        *self.state.lock()
    }

    /// Attempt a transition to `new_state`.
    ///
    /// Always returns the post-operation state: the new state on a legal
    /// transition, the unchanged current state otherwise.
    pub fn try_transition(&self, new_state: TaskStatus) -> TaskStatus {
        let mut state = self.state.lock();
        if Self::valid_transition(*state, new_state) {
            *state = new_state;
        }
        *state
    }

    /// Attempt to cancel. Succeeds iff the post-attempt state is
    /// [`TaskStatus::Cancelled`].
    pub fn cancel(&self) -> bool {
        let cancelled = self.try_transition(TaskStatus::Cancelled) == TaskStatus::Cancelled;
        tracing::trace!(cancelled, "task cancel attempt");
        cancelled
    }

    // Normal flow: Initial -> Queued -> Assigned -> Completed.
    // Also: any non-terminal state -> Cancelled -> Completed.
    fn valid_transition(old: TaskStatus, new: TaskStatus) -> bool {
        match old {
            TaskStatus::Initial => matches!(new, TaskStatus::Queued | TaskStatus::Cancelled),
            TaskStatus::Queued => matches!(new, TaskStatus::Assigned | TaskStatus::Cancelled),
            TaskStatus::Assigned => matches!(new, TaskStatus::Completed | TaskStatus::Cancelled),
            TaskStatus::Cancelled => matches!(new, TaskStatus::Completed),
            TaskStatus::Completed => false,
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

/// A task prepared for the worker pool: the boxed action, its details, and
/// the shared lifecycle state attached at submission.
pub struct PoolTask {
    inner: Box<dyn Task>,
    details: TaskDetails,
    state: Arc<TaskState>,
}

impl PoolTask {
    /// Wrap an action with the given details and a fresh [`TaskState`].
    pub fn new(inner: Box<dyn Task>, details: TaskDetails) -> Self {
        Self {
            inner,
            details,
            state: Arc::new(TaskState::new()),
        }
    }

    /// Wrap an engine-posted action ([`TaskDetails::engine`]).
    pub fn engine(inner: Box<dyn Task>) -> Self {
        Self::new(inner, TaskDetails::engine())
    }

    /// The submission's metadata.
    pub fn details(&self) -> &TaskDetails {
        &self.details
    }

    /// The shared lifecycle state.
    pub fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    /// Drive the shared state machine.
    pub fn try_transition(&self, new_state: TaskStatus) -> TaskStatus {
        self.state.try_transition(new_state)
    }

    /// Run the wrapped action, consuming the task.
    pub fn run(self) {
        self.inner.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = TaskState::new();
        assert_eq!(state.current(), TaskStatus::Initial);
    }

    #[test]
    fn test_normal_flow() {
        let state = TaskState::new();
        assert_eq!(state.try_transition(TaskStatus::Queued), TaskStatus::Queued);
        assert_eq!(
            state.try_transition(TaskStatus::Assigned),
            TaskStatus::Assigned
        );
        assert_eq!(
            state.try_transition(TaskStatus::Completed),
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_illegal_transition_is_noop() {
        let state = TaskState::new();
        // Initial -> Assigned is not in the table; the state must not move.
        assert_eq!(
            state.try_transition(TaskStatus::Assigned),
            TaskStatus::Initial
        );
        assert_eq!(state.current(), TaskStatus::Initial);

        // Initial -> Completed is not in the table either.
        assert_eq!(
            state.try_transition(TaskStatus::Completed),
            TaskStatus::Initial
        );
    }

    #[test]
    fn test_self_transition_is_noop() {
        let state = TaskState::new();
        state.try_transition(TaskStatus::Queued);
        assert_eq!(state.try_transition(TaskStatus::Queued), TaskStatus::Queued);
        assert_eq!(state.current(), TaskStatus::Queued);
    }

    #[test]
    fn test_completed_is_terminal() {
        let state = TaskState::new();
        state.try_transition(TaskStatus::Queued);
        state.try_transition(TaskStatus::Assigned);
        state.try_transition(TaskStatus::Completed);

        assert_eq!(
            state.try_transition(TaskStatus::Queued),
            TaskStatus::Completed
        );
        assert_eq!(
            state.try_transition(TaskStatus::Cancelled),
            TaskStatus::Completed
        );
        assert_eq!(state.current(), TaskStatus::Completed);
    }

    #[test]
    fn test_cancel_from_initial_and_queued() {
        let a = TaskState::new();
        assert!(a.cancel());
        assert_eq!(a.current(), TaskStatus::Cancelled);

        let b = TaskState::new();
        b.try_transition(TaskStatus::Queued);
        assert!(b.cancel());
        assert_eq!(b.current(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_while_assigned() {
        // Cooperative cancellation: the attempt succeeds but the running task
        // is not interrupted; the worker's final transition still lands.
        let state = TaskState::new();
        state.try_transition(TaskStatus::Queued);
        state.try_transition(TaskStatus::Assigned);

        assert!(state.cancel());
        assert_eq!(state.current(), TaskStatus::Cancelled);
        assert_eq!(
            state.try_transition(TaskStatus::Completed),
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_cancel_after_completed_fails() {
        let state = TaskState::new();
        state.try_transition(TaskStatus::Queued);
        state.try_transition(TaskStatus::Assigned);
        state.try_transition(TaskStatus::Completed);
        assert!(!state.cancel());
    }

    #[test]
    fn test_cancel_after_cancelled_reports_success() {
        let state = TaskState::new();
        assert!(state.cancel());
        // Already cancelled: the attempt is a no-op but the post-attempt
        // state is still Cancelled, so the call reports success.
        assert!(state.cancel());
    }

    #[test]
    fn test_pool_task_carries_details_and_state() {
        let task = PoolTask::new(Box::new(|| {}), TaskDetails::unknown());
        assert_eq!(task.details().category, TaskCategory::Unknown);
        assert_eq!(task.details().priority, -1);
        assert!(!task.details().cancelable);
        assert_eq!(task.state().current(), TaskStatus::Initial);

        let engine = PoolTask::engine(Box::new(|| {}));
        assert_eq!(engine.details().category, TaskCategory::Engine);
    }

    #[test]
    fn test_pool_task_run() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = PoolTask::new(
            Box::new(move || flag.store(true, Ordering::SeqCst)),
            TaskDetails::unknown(),
        );
        task.run();
        assert!(ran.load(Ordering::SeqCst));
    }
}
