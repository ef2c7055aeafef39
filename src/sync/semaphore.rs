//! Binary and counting semaphores.
//!
//! `give` never blocks and may be called from interrupt handlers. When a
//! task is waiting, `give` hands the token straight to the best waiter
//! instead of raising the count, so a woken task cannot lose its token to a
//! task that happened to run first.

use core::cell::RefCell;
use core::task::Poll;

use log::warn;

use super::{critical_section, must_give_up, ready_or_timeout, resume_wait, SyncError};
use crate::kernel;
use crate::scheduler::{Scheduler, WaitList};
use crate::task::Wake;
use crate::time::{Deadline, Timeout};

struct SemaphoreState {
    count: u32,
    max: u32,
    waiters: WaitList,
}

/// Outcome of a give.
enum Release {
    HandedOff,
    Counted,
    Saturated,
}

struct RawSemaphore {
    state: critical_section::Mutex<RefCell<SemaphoreState>>,
}

impl RawSemaphore {
    const fn new(initial: u32, max: u32) -> Self {
        assert!(max > 0, "semaphore maximum must be non-zero");
        assert!(initial <= max, "semaphore initial count exceeds its maximum");
        Self {
            state: critical_section::Mutex::new(RefCell::new(SemaphoreState {
                count: initial,
                max,
                waiters: WaitList::new(),
            })),
        }
    }

    fn count(&self) -> u32 {
        critical_section(|cs| self.state.borrow_ref(cs).count)
    }

    fn poll_take(&self, sched: &mut Scheduler, deadline: Deadline) -> Poll<Result<(), SyncError>> {
        let (wake, deadline) = resume_wait(sched, deadline);
        if let Wake::Signaled(_) = wake {
            return Poll::Ready(Ok(()));
        }
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if state.count > 0 {
                state.count -= 1;
                return Poll::Ready(Ok(()));
            }
            if must_give_up(sched, deadline) {
                return Poll::Ready(Err(SyncError::Timeout));
            }
            sched.block_current(&mut state.waiters, deadline, 0)?;
            Poll::Pending
        })
    }

    fn release(&self, sched: &mut Scheduler) -> Release {
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if sched.unblock_one(&state.waiters, 1).is_some() {
                return Release::HandedOff;
            }
            if state.count >= state.max {
                return Release::Saturated;
            }
            state.count += 1;
            Release::Counted
        })
    }
}

// ---------------------------------------------------------------------------
// Binary semaphore
// ---------------------------------------------------------------------------

/// A semaphore that is either available or not.
///
/// Giving an already available semaphore has no effect.
pub struct BinarySemaphore {
    raw: RawSemaphore,
}

impl BinarySemaphore {
    /// A semaphore that starts available if `available` is set.
    pub const fn new(available: bool) -> Self {
        Self {
            raw: RawSemaphore::new(available as u32, 1),
        }
    }

    /// Wait up to `timeout` for the semaphore and take it.
    pub fn take(&self, timeout: impl Into<Timeout>) -> Result<(), SyncError> {
        kernel::block_on(timeout.into(), |sched, deadline| self.poll_take(sched, deadline))
    }

    /// Take the semaphore if it is available.
    pub fn try_take(&self) -> Result<(), SyncError> {
        kernel::with(|sched| ready_or_timeout(self.poll_take(sched, Deadline::NoWait)))
    }

    /// Make the semaphore available, or wake a waiter. Never blocks; usable
    /// from interrupt handlers.
    pub fn give(&self) {
        kernel::with(|sched| self.give_with(sched))
    }

    pub fn is_available(&self) -> bool {
        self.raw.count() > 0
    }

    /// One take attempt on behalf of the current task.
    pub fn poll_take(&self, sched: &mut Scheduler, deadline: Deadline) -> Poll<Result<(), SyncError>> {
        self.raw.poll_take(sched, deadline)
    }

    /// Give from kernel context.
    pub fn give_with(&self, sched: &mut Scheduler) {
        self.raw.release(sched);
    }
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new(false)
    }
}

// ---------------------------------------------------------------------------
// Counting semaphore
// ---------------------------------------------------------------------------

/// A semaphore holding up to `max` tokens.
pub struct CountingSemaphore {
    raw: RawSemaphore,
}

impl CountingSemaphore {
    /// # Panics
    /// If `max` is zero or `initial` exceeds `max`. In a `static`
    /// initializer this is a build error.
    pub const fn new(initial: u32, max: u32) -> Self {
        Self {
            raw: RawSemaphore::new(initial, max),
        }
    }

    /// Wait up to `timeout` for a token and take it.
    pub fn take(&self, timeout: impl Into<Timeout>) -> Result<(), SyncError> {
        kernel::block_on(timeout.into(), |sched, deadline| self.poll_take(sched, deadline))
    }

    /// Take a token if one is available.
    pub fn try_take(&self) -> Result<(), SyncError> {
        kernel::with(|sched| ready_or_timeout(self.poll_take(sched, Deadline::NoWait)))
    }

    /// Return a token, or hand it to a waiter. Never blocks; usable from
    /// interrupt handlers.
    ///
    /// # Errors
    /// [`SyncError::Overflow`] if the count is already at its maximum; the
    /// give is ignored.
    pub fn give(&self) -> Result<(), SyncError> {
        kernel::with(|sched| self.give_with(sched))
    }

    pub fn count(&self) -> u32 {
        self.raw.count()
    }

    pub fn max(&self) -> u32 {
        critical_section(|cs| self.raw.state.borrow_ref(cs).max)
    }

    /// One take attempt on behalf of the current task.
    pub fn poll_take(&self, sched: &mut Scheduler, deadline: Deadline) -> Poll<Result<(), SyncError>> {
        self.raw.poll_take(sched, deadline)
    }

    /// Give from kernel context.
    pub fn give_with(&self, sched: &mut Scheduler) -> Result<(), SyncError> {
        match self.raw.release(sched) {
            Release::HandedOff | Release::Counted => Ok(()),
            Release::Saturated => {
                warn!("counting semaphore given beyond its maximum");
                Err(SyncError::Overflow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::started;
    use crate::task::{Priority, TaskState};

    #[test]
    fn test_binary_give_is_idempotent() {
        let (mut sched, _) = started(&[Priority::Normal]);
        let sem = BinarySemaphore::new(false);
        assert!(!sem.is_available());
        sem.give_with(&mut sched);
        sem.give_with(&mut sched);
        assert!(sem.is_available());
        assert_eq!(sem.poll_take(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        assert_eq!(
            sem.poll_take(&mut sched, Deadline::NoWait),
            Poll::Ready(Err(SyncError::Timeout))
        );
    }

    #[test]
    fn test_counting_saturates_at_max() {
        let (mut sched, _) = started(&[Priority::Normal]);
        let sem = CountingSemaphore::new(1, 2);
        assert_eq!(sem.give_with(&mut sched), Ok(()));
        assert_eq!(sem.give_with(&mut sched), Err(SyncError::Overflow));
        assert_eq!(sem.count(), 2);
        assert_eq!(sem.max(), 2);

        for _ in 0..2 {
            assert_eq!(sem.poll_take(&mut sched, Deadline::NoWait), Poll::Ready(Ok(())));
        }
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_give_hands_token_to_waiter() {
        let (mut sched, ids) = started(&[Priority::High, Priority::Low]);
        let sem = CountingSemaphore::new(0, 4);

        assert_eq!(sem.poll_take(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.state_of(ids[0]), TaskState::Blocked);

        // The low task gives: the token goes straight to the waiter
        assert_eq!(sem.give_with(&mut sched), Ok(()));
        assert_eq!(sem.count(), 0);
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sem.poll_take(&mut sched, Deadline::Never), Poll::Ready(Ok(())));
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_take_times_out() {
        let (mut sched, ids) = started(&[Priority::High, Priority::Low]);
        let sem = BinarySemaphore::new(false);
        let deadline = Deadline::new(sched.now(), Timeout::Ticks(3));

        assert_eq!(sem.poll_take(&mut sched, deadline), Poll::Pending);
        sched.tick();
        sched.tick();
        assert_eq!(sched.state_of(ids[0]), TaskState::Blocked);
        sched.tick();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(
            sem.poll_take(&mut sched, deadline),
            Poll::Ready(Err(SyncError::Timeout))
        );
    }

    #[test]
    fn test_timed_out_waiter_still_gets_late_token() {
        let (mut sched, ids) = started(&[Priority::High, Priority::Low]);
        let sem = BinarySemaphore::new(false);
        let deadline = Deadline::new(sched.now(), Timeout::Ticks(1));

        assert_eq!(sem.poll_take(&mut sched, deadline), Poll::Pending);
        sched.tick();
        assert_eq!(sched.current(), Some(ids[0]));
        // An interrupt gives after the timeout but before the task retries
        sem.give_with(&mut sched);
        assert_eq!(sem.poll_take(&mut sched, deadline), Poll::Ready(Ok(())));
    }
}
