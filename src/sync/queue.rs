//! Fixed-capacity message queue of `Copy` values.

use core::cell::RefCell;
use core::task::Poll;

use heapless::Deque;

use super::{critical_section, must_give_up, ready_or_timeout, resume_wait, SyncError};
use crate::kernel;
use crate::scheduler::{Scheduler, WaitList};
use crate::time::{Deadline, Timeout};

struct QueueState<T, const N: usize> {
    buffer: Deque<T, N>,
    senders: WaitList,
    receivers: WaitList,
}

/// A FIFO ring buffer of up to `N` values.
///
/// `send` blocks while the queue is full and `receive` while it is empty.
/// Every successful send wakes one blocked receiver and every successful
/// receive wakes one blocked sender.
///
/// ```ignore
/// static SAMPLES: Queue<u16, 8> = Queue::new();
///
/// SAMPLES.send(adc_value, Timeout::millis(10))?;
/// let sample = SAMPLES.receive(INFINITE)?;
/// ```
pub struct Queue<T, const N: usize> {
    state: critical_section::Mutex<RefCell<QueueState<T, N>>>,
}

impl<T: Copy, const N: usize> Queue<T, N> {
    const VALID: () = assert!(N > 0, "queue capacity must be non-zero");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        Self {
            state: critical_section::Mutex::new(RefCell::new(QueueState {
                buffer: Deque::new(),
                senders: WaitList::new(),
                receivers: WaitList::new(),
            })),
        }
    }

    // -----------------------------------------------------------------------
    // Task / ISR layer
    // -----------------------------------------------------------------------

    /// Append `value`, waiting up to `timeout` for space.
    pub fn send(&self, value: T, timeout: impl Into<Timeout>) -> Result<(), SyncError> {
        kernel::block_on(timeout.into(), |sched, deadline| {
            self.poll_send(sched, value, deadline)
        })
    }

    /// Append `value` if there is space. Usable from interrupt handlers.
    pub fn try_send(&self, value: T) -> Result<(), SyncError> {
        kernel::with(|sched| ready_or_timeout(self.poll_send(sched, value, Deadline::NoWait)))
    }

    /// Remove the oldest value, waiting up to `timeout` for one.
    pub fn receive(&self, timeout: impl Into<Timeout>) -> Result<T, SyncError> {
        kernel::block_on(timeout.into(), |sched, deadline| self.poll_receive(sched, deadline))
    }

    /// Remove the oldest value if there is one. Usable from interrupt
    /// handlers.
    pub fn try_receive(&self) -> Result<T, SyncError> {
        kernel::with(|sched| ready_or_timeout(self.poll_receive(sched, Deadline::NoWait)))
    }

    pub fn len(&self) -> usize {
        critical_section(|cs| self.state.borrow_ref(cs).buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    // -----------------------------------------------------------------------
    // Kernel-context layer
    // -----------------------------------------------------------------------

    /// One send attempt on behalf of the current task.
    pub fn poll_send(
        &self,
        sched: &mut Scheduler,
        value: T,
        deadline: Deadline,
    ) -> Poll<Result<(), SyncError>> {
        let (_, deadline) = resume_wait(sched, deadline);
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if state.buffer.push_back(value).is_ok() {
                sched.unblock_one(&state.receivers, 0);
                return Poll::Ready(Ok(()));
            }
            if must_give_up(sched, deadline) {
                return Poll::Ready(Err(SyncError::Timeout));
            }
            sched.block_current(&mut state.senders, deadline, 0)?;
            Poll::Pending
        })
    }

    /// One receive attempt on behalf of the current task.
    pub fn poll_receive(&self, sched: &mut Scheduler, deadline: Deadline) -> Poll<Result<T, SyncError>> {
        let (_, deadline) = resume_wait(sched, deadline);
        critical_section(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if let Some(value) = state.buffer.pop_front() {
                sched.unblock_one(&state.senders, 0);
                return Poll::Ready(Ok(value));
            }
            if must_give_up(sched, deadline) {
                return Poll::Ready(Err(SyncError::Timeout));
            }
            sched.block_current(&mut state.receivers, deadline, 0)?;
            Poll::Pending
        })
    }
}

impl<T: Copy, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::started;
    use crate::task::{Priority, TaskState};

    #[test]
    fn test_fifo_order() {
        let (mut sched, _) = started(&[Priority::Normal]);
        let queue: Queue<u8, 4> = Queue::new();
        for value in 1..=3 {
            assert_eq!(queue.poll_send(&mut sched, value, Deadline::NoWait), Poll::Ready(Ok(())));
        }
        assert_eq!(queue.len(), 3);
        for value in 1..=3 {
            assert_eq!(queue.poll_receive(&mut sched, Deadline::NoWait), Poll::Ready(Ok(value)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_blocking_calls_report_timeout() {
        let (mut sched, _) = started(&[Priority::Normal]);
        let queue: Queue<u32, 1> = Queue::new();
        assert_eq!(
            queue.poll_receive(&mut sched, Deadline::NoWait),
            Poll::Ready(Err(SyncError::Timeout))
        );
        assert_eq!(queue.poll_send(&mut sched, 1, Deadline::NoWait), Poll::Ready(Ok(())));
        assert!(queue.is_full());
        assert_eq!(
            queue.poll_send(&mut sched, 2, Deadline::NoWait),
            Poll::Ready(Err(SyncError::Timeout))
        );
    }

    #[test]
    fn test_receiver_blocks_until_send() {
        let (mut sched, ids) = started(&[Priority::High, Priority::Low]);
        let (consumer, producer) = (ids[0], ids[1]);
        let queue: Queue<u16, 2> = Queue::new();

        assert_eq!(queue.poll_receive(&mut sched, Deadline::Never), Poll::Pending);
        assert_eq!(sched.state_of(consumer), TaskState::Blocked);
        assert_eq!(sched.current(), Some(producer));

        assert_eq!(queue.poll_send(&mut sched, 42, Deadline::Never), Poll::Ready(Ok(())));
        assert_eq!(sched.current(), Some(consumer));
        assert_eq!(queue.poll_receive(&mut sched, Deadline::Never), Poll::Ready(Ok(42)));
    }

    #[test]
    fn test_sender_times_out_when_full() {
        let (mut sched, ids) = started(&[Priority::High, Priority::Low]);
        let queue: Queue<u8, 1> = Queue::new();
        let deadline = Deadline::new(sched.now(), Timeout::Ticks(5));

        assert_eq!(queue.poll_send(&mut sched, 1, deadline), Poll::Ready(Ok(())));
        assert_eq!(queue.poll_send(&mut sched, 2, deadline), Poll::Pending);
        for _ in 0..4 {
            sched.tick();
            assert_eq!(sched.current(), Some(ids[1]));
        }
        sched.tick();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(
            queue.poll_send(&mut sched, 2, deadline),
            Poll::Ready(Err(SyncError::Timeout))
        );
        assert_eq!(queue.len(), 1);
    }
}
