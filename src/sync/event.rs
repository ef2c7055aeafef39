//! Event-flag groups.
//!
//! A 32-bit mask that tasks wait on. `set` ORs bits in and wakes every
//! waiter whose condition now holds; each woken waiter receives the flag
//! value observed at that moment. Waiting never consumes bits; use `clear`.

use core::cell::RefCell;
use core::task::Poll;

use super::{critical_section, must_give_up, resume_wait, SyncError};
use crate::kernel;
use crate::scheduler::{Scheduler, WaitList};
use crate::task::Wake;
use crate::time::{Deadline, Timeout};

/// Which requested bits a waiter needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// At least one of the requested bits.
    Any,
    /// Every requested bit.
    All,
}

impl WaitMode {
    #[inline]
    fn is_satisfied(self, bits: u32, mask: u32) -> bool {
        match self {
            WaitMode::Any => bits & mask != 0,
            WaitMode::All => bits & mask == mask,
        }
    }
}

struct EventState {
    bits: u32,
    any_waiters: WaitList,
    all_waiters: WaitList,
}

/// A group of 32 event flags.
pub struct EventFlags {
    state: critical_section::Mutex<RefCell<EventState>>,
}

impl EventFlags {
    /// A group with every flag clear.
    pub const fn new() -> Self {
        Self::with_bits(0)
    }

    /// A group starting with `bits` set.
    pub const fn with_bits(bits: u32) -> Self {
        Self {
            state: critical_section::Mutex::new(RefCell::new(EventState {
                bits,
                any_waiters: WaitList::new(),
                all_waiters: WaitList::new(),
            })),
        }
    }

    // -----------------------------------------------------------------------
    // Task / ISR layer
    // -----------------------------------------------------------------------

    /// Set the bits in `mask` and wake the waiters this satisfies. Never
    /// blocks; usable from interrupt handlers. Returns the new flag value.
    pub fn set(&self, mask: u32) -> u32 {
        kernel::with(|sched| self.set_with(sched, mask))
    }

    /// Clear the bits in `mask`. Returns the flag value before clearing.
    pub fn clear(&self, mask: u32) -> u32 {
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let before = state.bits;
            state.bits &= !mask;
            before
        })
    }

    /// Current flag value.
    pub fn get(&self) -> u32 {
        critical_section(|cs| self.state.borrow_ref(cs).bits)
    }

    /// Wait up to `timeout` until any bit of `mask` is set. Returns the flag
    /// value that satisfied the wait.
    pub fn wait_any(&self, mask: u32, timeout: impl Into<Timeout>) -> Result<u32, SyncError> {
        self.wait(mask, WaitMode::Any, timeout.into())
    }

    /// Wait up to `timeout` until every bit of `mask` is set. Returns the
    /// flag value that satisfied the wait.
    pub fn wait_all(&self, mask: u32, timeout: impl Into<Timeout>) -> Result<u32, SyncError> {
        self.wait(mask, WaitMode::All, timeout.into())
    }

    fn wait(&self, mask: u32, mode: WaitMode, timeout: Timeout) -> Result<u32, SyncError> {
        kernel::block_on(timeout, |sched, deadline| self.poll_wait(sched, mask, mode, deadline))
    }

    // -----------------------------------------------------------------------
    // Kernel-context layer
    // -----------------------------------------------------------------------

    /// One wait attempt on behalf of the current task.
    pub fn poll_wait(
        &self,
        sched: &mut Scheduler,
        mask: u32,
        mode: WaitMode,
        deadline: Deadline,
    ) -> Poll<Result<u32, SyncError>> {
        if mask == 0 {
            return Poll::Ready(Err(SyncError::EmptyMask));
        }
        let (wake, deadline) = resume_wait(sched, deadline);
        if let Wake::Signaled(bits) = wake {
            return Poll::Ready(Ok(bits));
        }
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if mode.is_satisfied(state.bits, mask) {
                return Poll::Ready(Ok(state.bits));
            }
            if must_give_up(sched, deadline) {
                return Poll::Ready(Err(SyncError::Timeout));
            }
            let list = match mode {
                WaitMode::Any => &mut state.any_waiters,
                WaitMode::All => &mut state.all_waiters,
            };
            sched.block_current(list, deadline, mask)?;
            Poll::Pending
        })
    }

    /// Set from kernel context.
    pub fn set_with(&self, sched: &mut Scheduler, mask: u32) -> u32 {
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.bits |= mask;
            let bits = state.bits;
            let satisfied = |mode: WaitMode| move |wanted: u32| mode.is_satisfied(bits, wanted).then_some(bits);
            sched.unblock_where(&state.any_waiters, satisfied(WaitMode::Any));
            sched.unblock_where(&state.all_waiters, satisfied(WaitMode::All));
            bits
        })
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}
