//! # Ready Queue
//!
//! One intrusive FIFO list per priority level plus an 8-bit bitmap. Bit `p`
//! of the bitmap is set iff the list for priority `p` is non-empty, so the
//! highest ready priority is one `leading_zeros` away.
//!
//! ```text
//!   bitmap: 0b0001_1000
//!                 ││
//!   prio 4 ───────┘└──── prio 3
//!
//!   heads[4] ─► T05 ─► T02 ─► None      tails[4] = T02
//!   heads[3] ─► T01 ─► None             tails[3] = T01
//! ```
//!
//! The `next` links live in each task's [`Link::Ready`] slot; the queue only
//! owns the head and tail of each list.

use crate::config::NUM_PRIORITIES;
use crate::task::{Link, Priority, TaskControlBlock, TaskId};

/// Priority-indexed collection of runnable tasks.
#[derive(Debug, Clone)]
pub struct ReadyQueue {
    heads: [Option<TaskId>; NUM_PRIORITIES],
    tails: [Option<TaskId>; NUM_PRIORITIES],
    bitmap: u8,
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            heads: [None; NUM_PRIORITIES],
            tails: [None; NUM_PRIORITIES],
            bitmap: 0,
        }
    }

    /// Bit `p` is set iff a task of priority `p` is ready.
    #[inline]
    pub fn bitmap(&self) -> u8 {
        self.bitmap
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Highest priority with a ready task.
    #[inline]
    pub fn highest_priority(&self) -> Option<Priority> {
        if self.bitmap == 0 {
            return None;
        }
        Priority::from_level(7 - self.bitmap.leading_zeros() as u8).ok()
    }

    /// Head of the highest non-empty list.
    #[inline]
    pub fn highest(&self) -> Option<TaskId> {
        let priority = self.highest_priority()?;
        self.heads[priority.level() as usize]
    }

    /// Append `id` to the tail of the list for its effective priority.
    pub fn push_back(&mut self, tasks: &mut [TaskControlBlock], id: TaskId) {
        debug_assert_eq!(tasks[id.index()].link, Link::Detached);
        let level = tasks[id.index()].priority.level() as usize;

        tasks[id.index()].link = Link::Ready { next: None };
        match self.tails[level] {
            Some(tail) => set_next(tasks, tail, Some(id)),
            None => self.heads[level] = Some(id),
        }
        self.tails[level] = Some(id);
        self.bitmap |= 1 << level;
    }

    /// Unlink `id` from the list for its effective priority. Returns whether
    /// it was there.
    pub fn remove(&mut self, tasks: &mut [TaskControlBlock], id: TaskId) -> bool {
        let level = tasks[id.index()].priority.level() as usize;

        let mut prev: Option<TaskId> = None;
        let mut cursor = self.heads[level];
        while let Some(task) = cursor {
            let next = next_of(tasks, task);
            if task == id {
                match prev {
                    Some(prev) => set_next(tasks, prev, next),
                    None => self.heads[level] = next,
                }
                if self.tails[level] == Some(id) {
                    self.tails[level] = prev;
                }
                if self.heads[level].is_none() {
                    self.bitmap &= !(1 << level);
                }
                tasks[id.index()].link = Link::Detached;
                return true;
            }
            prev = Some(task);
            cursor = next;
        }
        false
    }

    /// Move `id` to the tail of its list.
    pub fn rotate(&mut self, tasks: &mut [TaskControlBlock], id: TaskId) {
        if self.remove(tasks, id) {
            self.push_back(tasks, id);
        }
    }

    /// Number of tasks in the list for `priority`.
    pub fn len_at(&self, tasks: &[TaskControlBlock], priority: Priority) -> usize {
        let mut len = 0;
        let mut cursor = self.heads[priority.level() as usize];
        while let Some(task) = cursor {
            len += 1;
            cursor = next_of(tasks, task);
        }
        len
    }

    /// Check the bitmap against the lists and every list member against its
    /// own priority and link slot.
    pub fn is_consistent(&self, tasks: &[TaskControlBlock]) -> bool {
        for level in 0..NUM_PRIORITIES {
            let bit_set = self.bitmap & (1 << level) != 0;
            if bit_set != self.heads[level].is_some() {
                return false;
            }
            let mut last = None;
            let mut cursor = self.heads[level];
            let mut steps = 0;
            while let Some(task) = cursor {
                let tcb = &tasks[task.index()];
                if tcb.priority.level() as usize != level || !matches!(tcb.link, Link::Ready { .. }) {
                    return false;
                }
                steps += 1;
                if steps > tasks.len() {
                    // cycle
                    return false;
                }
                last = Some(task);
                cursor = next_of(tasks, task);
            }
            if last != self.tails[level] {
                return false;
            }
        }
        true
    }
}

fn next_of(tasks: &[TaskControlBlock], id: TaskId) -> Option<TaskId> {
    match tasks[id.index()].link {
        Link::Ready { next } => next,
        _ => None,
    }
}

fn set_next(tasks: &mut [TaskControlBlock], id: TaskId, value: Option<TaskId>) {
    if let Link::Ready { next } = &mut tasks[id.index()].link {
        *next = value;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 8;

    fn arena(priorities: &[Priority]) -> [TaskControlBlock; N] {
        let mut tasks = [TaskControlBlock::EMPTY; N];
        for (i, priority) in priorities.iter().enumerate() {
            tasks[i].id = TaskId::new(i);
            tasks[i].priority = *priority;
            tasks[i].active = true;
        }
        tasks
    }

    fn id(i: usize) -> TaskId {
        TaskId::new(i)
    }

    #[test]
    fn test_empty_queue() {
        let queue = ReadyQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.highest(), None);
        assert_eq!(queue.highest_priority(), None);
    }

    #[test]
    fn test_highest_priority_wins() {
        let mut tasks = arena(&[Priority::Low, Priority::High, Priority::Normal]);
        let mut queue = ReadyQueue::new();
        for i in 0..3 {
            queue.push_back(&mut tasks, id(i));
        }
        assert_eq!(queue.bitmap(), 0b0001_1010);
        assert_eq!(queue.highest(), Some(id(1)));
        assert_eq!(queue.highest_priority(), Some(Priority::High));

        assert!(queue.remove(&mut tasks, id(1)));
        assert_eq!(queue.highest(), Some(id(2)));
        assert_eq!(queue.bitmap(), 0b0000_1010);
        assert!(queue.is_consistent(&tasks));
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut tasks = arena(&[Priority::Normal; 3]);
        let mut queue = ReadyQueue::new();
        for i in 0..3 {
            queue.push_back(&mut tasks, id(i));
        }
        assert_eq!(queue.highest(), Some(id(0)));
        assert_eq!(queue.len_at(&tasks, Priority::Normal), 3);

        queue.rotate(&mut tasks, id(0));
        assert_eq!(queue.highest(), Some(id(1)));
        queue.rotate(&mut tasks, id(1));
        assert_eq!(queue.highest(), Some(id(2)));
        queue.rotate(&mut tasks, id(2));
        assert_eq!(queue.highest(), Some(id(0)));
        assert!(queue.is_consistent(&tasks));
    }

    #[test]
    fn test_remove_middle_and_tail() {
        let mut tasks = arena(&[Priority::High; 3]);
        let mut queue = ReadyQueue::new();
        for i in 0..3 {
            queue.push_back(&mut tasks, id(i));
        }

        assert!(queue.remove(&mut tasks, id(1)));
        assert!(queue.is_consistent(&tasks));
        assert!(queue.remove(&mut tasks, id(2)));
        assert!(queue.is_consistent(&tasks));
        assert!(!queue.remove(&mut tasks, id(2)));

        // The tail moved back to the head, so appends still land in order
        queue.push_back(&mut tasks, id(2));
        queue.rotate(&mut tasks, id(0));
        assert_eq!(queue.highest(), Some(id(2)));
        assert_eq!(tasks[1].link, Link::Detached);
        assert!(queue.is_consistent(&tasks));
    }

    #[test]
    fn test_bitmap_tracks_every_mutation() {
        let priorities = [
            Priority::Idle,
            Priority::Low,
            Priority::Normal,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
            Priority::Critical,
            Priority::Higher,
        ];
        let mut tasks = arena(&priorities);
        let mut queue = ReadyQueue::new();
        let mut ready = [false; N];

        // Deterministic xorshift sequence of make-ready / make-not-ready
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let i = (seed % N as u32) as usize;
            if ready[i] {
                assert!(queue.remove(&mut tasks, id(i)));
            } else {
                queue.push_back(&mut tasks, id(i));
            }
            ready[i] = !ready[i];

            assert!(queue.is_consistent(&tasks));
            for level in 0..NUM_PRIORITIES {
                let expected = (0..N).any(|t| ready[t] && priorities[t].level() as usize == level);
                assert_eq!(queue.bitmap() & (1 << level) != 0, expected);
            }
        }
    }
}
