//! # Kernel Errors
//!
//! Configuration and administration failures. These are reported when a
//! task is created or managed, never from inside the scheduler's fast path.
//! Kernel-invariant violations are not represented here: they are fatal
//! and panic.

use core::fmt;

use crate::task::TaskId;

/// Error returned by task creation and task administration calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Priority level outside `0..=7`.
    InvalidPriority(u8),
    /// Stack region smaller than [`MIN_STACK_SIZE`](crate::config::MIN_STACK_SIZE).
    StackTooSmall { size: usize, min: usize },
    /// Stack base or size not a multiple of [`STACK_ALIGN`](crate::config::STACK_ALIGN).
    StackMisaligned,
    /// The stack already belongs to another task.
    StackInUse,
    /// The TCB arena is full.
    TooManyTasks,
    /// Tasks are statically provisioned; the scheduler is already running.
    AlreadyStarted,
    /// The scheduler has not been started yet.
    NotStarted,
    /// `start()` was called before an idle task was installed.
    NoIdleTask,
    /// An idle task is already installed.
    IdleTaskInstalled,
    /// No task with this id exists.
    InvalidTask(TaskId),
    /// The operation is not permitted on the idle task.
    IdleTask,
    /// `resume()` on a task that is not suspended.
    NotSuspended(TaskId),
    /// A task-only call made from an interrupt handler.
    InterruptContext,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority(level) => write!(f, "priority level {level} out of range 0..=7"),
            Self::StackTooSmall { size, min } => {
                write!(f, "stack of {size} bytes is below the {min} byte minimum")
            }
            Self::StackMisaligned => write!(f, "stack is not 8-byte aligned"),
            Self::StackInUse => write!(f, "stack already belongs to another task"),
            Self::TooManyTasks => write!(f, "task table is full"),
            Self::AlreadyStarted => write!(f, "scheduler already started"),
            Self::NotStarted => write!(f, "scheduler not started"),
            Self::NoIdleTask => write!(f, "no idle task installed"),
            Self::IdleTaskInstalled => write!(f, "idle task already installed"),
            Self::InvalidTask(id) => write!(f, "no such task {id}"),
            Self::IdleTask => write!(f, "operation not permitted on the idle task"),
            Self::NotSuspended(id) => write!(f, "task {id} is not suspended"),
            Self::InterruptContext => write!(f, "not allowed in interrupt context"),
        }
    }
}
