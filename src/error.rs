//! Runtime errors

use thiserror::Error;

use crate::task::TaskId;

/// Errors reported by the scheduler API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Tasks can only be registered before `run` starts
    #[error("cannot spawn a task while the scheduler is running")]
    SpawnWhileRunning,

    /// `run` or `configure` called from inside a running task
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `yield_now` called with no task executing
    #[error("yield called outside of a running task")]
    NotInTask,

    /// Configured stack cannot hold a task
    #[error("task stack of {requested} bytes is below the minimum of {minimum} bytes")]
    StackTooSmall { requested: usize, minimum: usize },

    /// Configuration must be applied before any task is registered
    #[error("cannot reconfigure with {count} task(s) already registered")]
    TasksPending { count: usize },

    /// A task wrote into the guard region at the bottom of its stack
    #[error("task {task} ({name}) overflowed its {stack_size}-byte stack")]
    StackOverflow {
        task: TaskId,
        name: &'static str,
        stack_size: usize,
    },

    /// A task body panicked; the remaining tasks still ran to completion
    #[error("task {task} ({name}) panicked: {message}")]
    TaskPanicked {
        task: TaskId,
        name: &'static str,
        message: String,
    },
}
