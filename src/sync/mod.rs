//! # Synchronization Primitives
//!
//! Message queue, binary and counting semaphores, mutex with priority
//! inheritance and event-flag groups, all built on the scheduler's
//! block/unblock operations.
//!
//! ## Two layers
//!
//! Every primitive offers a **kernel-context layer** (`poll_*`, `*_with`)
//! that takes `&mut Scheduler` explicitly and performs exactly one attempt:
//! it completes, fails, or blocks the current task and returns
//! [`Poll::Pending`](core::task::Poll::Pending). On top of it sits the
//! **task/ISR layer** (`send`, `take`, `lock`, ...) which drives the first
//! layer against the global kernel, retrying after every wake-up until the
//! operation completes or its deadline passes.
//!
//! ```text
//!   task ──► Queue::send(v, timeout)
//!              │ kernel::block_on
//!              ▼
//!            Queue::poll_send(&mut Scheduler, v, deadline)
//!              │ full?  ──► Scheduler::block_current(senders) ─► PendSV
//!              ▼
//!            Scheduler::unblock_one(receivers)
//! ```
//!
//! Only non-blocking calls (`give`, `set`, `try_*`) may be made from an
//! interrupt handler.

use core::fmt;
use core::task::Poll;

use crate::scheduler::Scheduler;
use crate::task::Wake;
use crate::time::Deadline;

pub mod event;
pub mod mutex;
pub mod queue;
pub mod semaphore;

pub use event::EventFlags;
pub use mutex::Mutex;
pub use queue::Queue;
pub use semaphore::{BinarySemaphore, CountingSemaphore};

/// Error returned by synchronization primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The deadline passed, or a non-blocking call would have had to wait.
    Timeout,
    /// `give()` on a counting semaphore already at its maximum.
    Overflow,
    /// `unlock()` by a task that does not own the mutex.
    NotOwner,
    /// `lock()` by the task that already owns the mutex.
    AlreadyOwned,
    /// Event wait with an empty mask.
    EmptyMask,
    /// A blocking or ownership call made from an interrupt handler.
    InterruptContext,
    /// The call needs a running task, but the scheduler has not started.
    NotRunning,
    /// The idle task tried to block or to take a mutex.
    IdleTask,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "operation timed out"),
            Self::Overflow => write!(f, "semaphore count overflow"),
            Self::NotOwner => write!(f, "mutex not owned by caller"),
            Self::AlreadyOwned => write!(f, "mutex already owned by caller"),
            Self::EmptyMask => write!(f, "empty event mask"),
            Self::InterruptContext => write!(f, "not allowed in interrupt context"),
            Self::NotRunning => write!(f, "scheduler not running"),
            Self::IdleTask => write!(f, "not allowed in the idle task"),
        }
    }
}

/// Execute a closure within a critical section (interrupts disabled).
///
/// All primitive state is kept in `critical_section::Mutex` cells and is
/// only reached through this function. Sections nest, so a primitive may
/// take one while the kernel already holds another.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     let mut state = self.state.borrow_ref_mut(cs);
///     // ...
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Turn a single non-blocking attempt into a result, treating a request to
/// block as a timeout.
pub(crate) fn ready_or_timeout<T>(poll: Poll<Result<T, SyncError>>) -> Result<T, SyncError> {
    match poll {
        Poll::Ready(result) => result,
        Poll::Pending => Err(SyncError::Timeout),
    }
}

/// Consume the wake reason of a task retrying a blocking call. A task whose
/// deadline woke it gets one last attempt that must not block again.
pub(crate) fn resume_wait(sched: &mut Scheduler, deadline: Deadline) -> (Wake, Deadline) {
    if !deadline.can_block() {
        return (Wake::None, deadline);
    }
    match sched.take_wake() {
        Wake::TimedOut => (Wake::TimedOut, Deadline::NoWait),
        wake => (wake, deadline),
    }
}

/// Should a failed attempt give up instead of blocking?
#[inline]
pub(crate) fn must_give_up(sched: &Scheduler, deadline: Deadline) -> bool {
    !deadline.can_block() || deadline.has_expired(sched.now())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::scheduler::Scheduler;
    use crate::stack::{Stack, StackRegion};
    use crate::task::{Priority, TaskId};

    fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> StackRegion {
        let stack: &'static Stack<512> = Box::leak(Box::new(Stack::new()));
        stack.region()
    }

    /// A started scheduler with one task per priority, in order.
    pub(crate) fn started(priorities: &[Priority]) -> (Scheduler, Vec<TaskId>) {
        let mut sched = Scheduler::new();
        sched.install_idle_task(stack(), spin).unwrap();
        let ids = priorities
            .iter()
            .map(|priority| sched.create_task(stack(), *priority, spin, "test").unwrap())
            .collect();
        sched.start().unwrap();
        (sched, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SyncError::Timeout), "operation timed out");
        assert_eq!(format!("{}", SyncError::NotOwner), "mutex not owned by caller");
        assert_eq!(format!("{}", SyncError::IdleTask), "not allowed in the idle task");
    }

    #[test]
    fn test_ready_or_timeout() {
        assert_eq!(ready_or_timeout(Poll::Ready(Ok(3))), Ok(3));
        assert_eq!(
            ready_or_timeout::<()>(Poll::Ready(Err(SyncError::Overflow))),
            Err(SyncError::Overflow)
        );
        assert_eq!(ready_or_timeout::<()>(Poll::Pending), Err(SyncError::Timeout));
    }

    #[test]
    fn test_critical_sections_nest() {
        let cell = critical_section::Mutex::new(core::cell::Cell::new(1));
        let value = critical_section(|outer| {
            critical_section(|inner| cell.borrow(inner).set(2));
            cell.borrow(outer).get()
        });
        assert_eq!(value, 2);
    }
}
