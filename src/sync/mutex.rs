//! Mutex with priority inheritance.
//!
//! ## Priority inheritance
//!
//! ```text
//!   prio
//!    6 ┤          H: lock() ─┐ blocked            ┌─ H owns the mutex
//!    6 ┤                     └► L boosted to 6 ───┘
//!    2 ┤ L: lock() ─────────────────────────────── L: unlock() → back to 2
//! ```
//!
//! A task blocked on a mutex lends its priority to the owner for as long as
//! it waits. The owner's effective priority is its base priority raised to
//! the highest waiter on any mutex it holds, so releasing one of several
//! mutexes keeps the boost the others still need. A waiter that times out
//! or is suspended stops lending at once, on the tick itself. `unlock`
//! hands ownership to the best waiter, which inherits the waiters left
//! behind.

use core::cell::RefCell;
use core::task::Poll;

use log::{debug, warn};

use super::{critical_section, must_give_up, ready_or_timeout, resume_wait, SyncError};
use crate::arch;
use crate::kernel;
use crate::scheduler::{Scheduler, WaitList};
use crate::task::{TaskId, Wake};
use crate::time::{Deadline, Timeout};

struct MutexState {
    owner: Option<TaskId>,
    waiters: WaitList,
}

/// Binary lock owned by the task that took it.
///
/// Mutexes may only be used from task context.
pub struct Mutex {
    state: critical_section::Mutex<RefCell<MutexState>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(RefCell::new(MutexState {
                owner: None,
                waiters: WaitList::new(),
            })),
        }
    }

    // -----------------------------------------------------------------------
    // Task layer
    // -----------------------------------------------------------------------

    /// Wait up to `timeout` for the mutex and take ownership of it.
    pub fn lock(&self, timeout: impl Into<Timeout>) -> Result<(), SyncError> {
        if arch::in_interrupt() {
            return Err(SyncError::InterruptContext);
        }
        kernel::block_on(timeout.into(), |sched, deadline| self.poll_lock(sched, deadline))
    }

    /// Take the mutex if it is free.
    pub fn try_lock(&self) -> Result<(), SyncError> {
        if arch::in_interrupt() {
            return Err(SyncError::InterruptContext);
        }
        kernel::with(|sched| ready_or_timeout(self.poll_lock(sched, Deadline::NoWait)))
    }

    /// Release the mutex.
    ///
    /// # Errors
    /// [`SyncError::NotOwner`] if the caller does not own it; the mutex is
    /// left untouched.
    pub fn unlock(&self) -> Result<(), SyncError> {
        if arch::in_interrupt() {
            return Err(SyncError::InterruptContext);
        }
        kernel::with(|sched| self.unlock_with(sched))
    }

    pub fn owner(&self) -> Option<TaskId> {
        critical_section(|cs| self.state.borrow_ref(cs).owner)
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    // -----------------------------------------------------------------------
    // Kernel-context layer
    // -----------------------------------------------------------------------

    /// One lock attempt on behalf of the current task.
    pub fn poll_lock(&self, sched: &mut Scheduler, deadline: Deadline) -> Poll<Result<(), SyncError>> {
        let Some(me) = sched.current() else {
            return Poll::Ready(Err(SyncError::NotRunning));
        };
        if sched.idle_task() == Some(me) {
            return Poll::Ready(Err(SyncError::IdleTask));
        }
        let (wake, deadline) = resume_wait(sched, deadline);
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if let Wake::Signaled(_) = wake {
                // unlock_with already made us the owner
                debug_assert_eq!(state.owner, Some(me));
                return Poll::Ready(Ok(()));
            }
            let owner = match state.owner {
                None => {
                    state.owner = Some(me);
                    return Poll::Ready(Ok(()));
                }
                Some(owner) if owner == me => return Poll::Ready(Err(SyncError::AlreadyOwned)),
                Some(owner) => owner,
            };
            if must_give_up(sched, deadline) {
                return Poll::Ready(Err(SyncError::Timeout));
            }
            debug!("{} at {} waits on {}", me, sched.priority_of(me), owner);
            sched.block_current_on(&mut state.waiters, deadline, owner)?;
            Poll::Pending
        })
    }

    /// Unlock on behalf of the current task.
    pub fn unlock_with(&self, sched: &mut Scheduler) -> Result<(), SyncError> {
        let me = sched.current().ok_or(SyncError::NotRunning)?;
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if state.owner != Some(me) {
                warn!("{} unlocked a mutex owned by {:?}", me, state.owner);
                return Err(SyncError::NotOwner);
            }
            state.owner = sched.pass_ownership(&state.waiters, me);
            if let Some(next) = state.owner {
                debug!("{} hands the mutex to {}", me, next);
            }
            Ok(())
        })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::started;
    use crate::task::{Priority, TaskState};
    use crate::time::INFINITE;

    #[test]
    fn test_lock_and_unlock() {
        let (mut sched, ids) = started(&[Priority::Normal]);
        let mutex = Mutex::new();
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        assert_eq!(mutex.owner(), Some(ids[0]));
        assert_eq!(
            mutex.poll_lock(&mut sched, Deadline::NoWait),
            Poll::Ready(Err(SyncError::AlreadyOwned))
        );
        assert_eq!(mutex.unlock_with(&mut sched), Ok(()));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_unlock_by_non_owner_is_rejected() {
        let (mut sched, ids) = started(&[Priority::Normal, Priority::Normal]);
        let mutex = Mutex::new();
        assert_eq!(mutex.unlock_with(&mut sched), Err(SyncError::NotOwner));

        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        sched.yield_current();
        assert_eq!(sched.current(), Some(ids[1]));
        assert_eq!(mutex.unlock_with(&mut sched), Err(SyncError::NotOwner));
        assert_eq!(mutex.owner(), Some(ids[0]));
    }

    #[test]
    fn test_priority_inheritance_round_trip() {
        let (mut sched, ids) = started(&[Priority::Highest, Priority::BelowNormal]);
        let (high, low) = (ids[0], ids[1]);
        let mutex = Mutex::new();

        // The high task sleeps so the low one can take the mutex
        sched.delay_current(1).unwrap();
        assert_eq!(sched.current(), Some(low));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));

        sched.tick();
        assert_eq!(sched.current(), Some(high));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.current(), Some(low));
        assert_eq!(sched.priority_of(low), Priority::Highest);

        assert_eq!(mutex.unlock_with(&mut sched), Ok(()));
        assert_eq!(sched.priority_of(low), Priority::BelowNormal);
        assert_eq!(sched.current(), Some(high));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Ready(Ok(())));
        assert_eq!(mutex.owner(), Some(high));
    }

    #[test]
    fn test_waiter_timeout_drops_inherited_priority_on_the_tick() {
        let (mut sched, ids) = started(&[Priority::Highest, Priority::BelowNormal]);
        let (high, low) = (ids[0], ids[1]);
        let mutex = Mutex::new();

        sched.delay_current(1).unwrap();
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        sched.tick();

        let deadline = Deadline::new(sched.now(), Timeout::Ticks(2));
        assert_eq!(mutex.poll_lock(&mut sched, deadline), Poll::Pending);
        assert_eq!(sched.priority_of(low), Priority::Highest);

        sched.tick();
        assert_eq!(sched.priority_of(low), Priority::Highest);
        sched.tick();

        // The boost ends with the wait, and the waiter preempts at once
        assert_eq!(sched.priority_of(low), Priority::BelowNormal);
        assert_eq!(sched.current(), Some(high));
        assert_eq!(
            mutex.poll_lock(&mut sched, deadline),
            Poll::Ready(Err(SyncError::Timeout))
        );
        assert_eq!(mutex.owner(), Some(low));
        assert_eq!(sched.state_of(low), TaskState::Ready);
    }

    #[test]
    fn test_suspended_waiter_stops_lending_priority() {
        let (mut sched, ids) = started(&[Priority::Highest, Priority::BelowNormal]);
        let (high, low) = (ids[0], ids[1]);
        let mutex = Mutex::new();

        sched.delay_current(1).unwrap();
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        sched.tick();
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.priority_of(low), Priority::Highest);

        sched.suspend(high).unwrap();
        assert_eq!(sched.priority_of(low), Priority::BelowNormal);

        // Resumed, the lock call retries and lends again
        sched.resume(high).unwrap();
        assert_eq!(sched.current(), Some(high));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.priority_of(low), Priority::Highest);
    }

    #[test]
    fn test_hand_off_passes_remaining_waiters_to_new_owner() {
        let (mut sched, ids) = started(&[Priority::Highest, Priority::Normal, Priority::Low]);
        let (high, normal, low) = (ids[0], ids[1], ids[2]);
        let mutex = Mutex::new();

        sched.delay_current(2).unwrap();
        sched.delay_current(1).unwrap();
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));

        sched.tick();
        assert_eq!(sched.current(), Some(normal));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.priority_of(low), Priority::Normal);

        sched.tick();
        assert_eq!(sched.current(), Some(high));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.priority_of(low), Priority::Highest);

        assert_eq!(mutex.unlock_with(&mut sched), Ok(()));
        assert_eq!(mutex.owner(), Some(high));
        assert_eq!(sched.priority_of(low), Priority::Low);
        assert_eq!(sched.task(normal).unwrap().holder(), Some(high));
        assert_eq!(sched.current(), Some(high));
        assert_eq!(mutex.poll_lock(&mut sched, Deadline::Never), Poll::Ready(Ok(())));

        assert_eq!(mutex.unlock_with(&mut sched), Ok(()));
        assert_eq!(mutex.owner(), Some(normal));
        assert_eq!(sched.state_of(normal), TaskState::Ready);
        assert_eq!(sched.priority_of(high), Priority::Highest);
    }

    #[test]
    fn test_idle_task_cannot_lock() {
        let (mut sched, _) = started(&[]);
        let mutex = Mutex::new();
        assert_eq!(
            mutex.poll_lock(&mut sched, Deadline::NoWait),
            Poll::Ready(Err(SyncError::IdleTask))
        );
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_calls_from_interrupt_are_rejected() {
        let mutex = Mutex::new();
        arch::as_interrupt(|| {
            assert_eq!(mutex.lock(INFINITE), Err(SyncError::InterruptContext));
            assert_eq!(mutex.try_lock(), Err(SyncError::InterruptContext));
            assert_eq!(mutex.unlock(), Err(SyncError::InterruptContext));
        });
        assert!(!mutex.is_locked());
    }
}
