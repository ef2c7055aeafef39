//! # Task Control Block
//!
//! Defines the task model for TickOS. Every task has a fixed base priority,
//! an effective priority that priority inheritance may raise temporarily, a
//! statically allocated stack and exactly one list slot.
//!
//! ## Lists
//!
//! A task is linked into at most one list at a time: the ready list of its
//! effective priority, or the wait list of one synchronization primitive.
//! The [`Link`] enum makes that rule structural instead of conventional.
//! All links are [`TaskId`] indices into the scheduler's arena.

use core::fmt;

use crate::error::KernelError;
use crate::scheduler::WaitKey;
use crate::stack::StackRegion;
use crate::time::Instant;

/// Task entry point. Tasks never return.
pub type TaskEntry = fn() -> !;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority. Higher levels preempt lower levels.
///
/// `Idle` (level 0) is shared with the kernel's idle task, which only runs
/// when no task at any level is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    BelowNormal = 2,
    Normal = 3,
    High = 4,
    Higher = 5,
    Highest = 6,
    Critical = 7,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Priority; 8] = [
        Priority::Idle,
        Priority::Low,
        Priority::BelowNormal,
        Priority::Normal,
        Priority::High,
        Priority::Higher,
        Priority::Highest,
        Priority::Critical,
    ];

    /// Numeric level, `0..=7`.
    #[inline]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Look up a priority by numeric level.
    pub const fn from_level(level: u8) -> Result<Priority, KernelError> {
        if level as usize >= Priority::ALL.len() {
            return Err(KernelError::InvalidPriority(level));
        }
        Ok(Priority::ALL[level as usize])
    }
}

impl TryFrom<u8> for Priority {
    type Error = KernelError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Priority::from_level(level)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.level())
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///                    reschedule()
///   ┌──────────┐ ─────────────────► ┌─────────┐
///   │  Ready   │                    │ Running │
///   └──────────┘ ◄───────────────── └─────────┘
///     ▲  ▲  ▲      preempt / yield    │  │  │
///     │  │  │                         │  │  │ block_current()
///     │  │  │ signal / timeout        │  │  ▼
///     │  │  └──────────────────── ┌─────────┐
///     │  │                        │ Blocked │
///     │  │ wake time reached      └─────────┘
///     │  └─────────────────── ┌─────────┐  │
///     │                       │ Delayed │◄─┘ delay_current()
///     │ resume()              └─────────┘
///     └──────────────────── ┌───────────┐
///                           │ Suspended │ ◄── suspend()
///                           └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable and linked into the ready list of its priority.
    Ready,
    /// Selected by the scheduler. Exactly one task is Running after start.
    Running,
    /// Waiting on a synchronization primitive, possibly with a timeout.
    Blocked,
    /// Removed from scheduling until `resume()`.
    Suspended,
    /// Sleeping until `wake_time`.
    Delayed,
}

// ---------------------------------------------------------------------------
// Handles and list slots
// ---------------------------------------------------------------------------

/// Stable handle of a task: its index in the scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u8);

impl TaskId {
    pub(crate) const fn new(index: usize) -> TaskId {
        TaskId(index as u8)
    }

    /// Index into the task arena.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:02}", self.0)
    }
}

/// The single list slot of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    /// In no list: running idle, delayed, suspended or not yet created.
    Detached,
    /// In the ready list of the task's effective priority.
    Ready { next: Option<TaskId> },
    /// In the wait list identified by `key`. `seq` orders waiters of equal
    /// priority; `tag` is private to the primitive (e.g. an event mask).
    /// `holder` is the lock owner this waiter lends its priority to.
    Waiting {
        key: WaitKey,
        seq: u32,
        tag: u32,
        holder: Option<TaskId>,
    },
}

/// Why a blocked task was made ready again. Consumed by the primitive when
/// the task retries its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Nothing recorded since the task last blocked.
    None,
    /// A signaling call woke the task and passed it a value.
    Signaled(u32),
    /// The task's deadline was reached while it waited.
    TimedOut,
    /// The wait was cut short by suspend/resume.
    Interrupted,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): everything the kernel knows about one task.
///
/// TCBs live in a fixed arena inside the scheduler; a task is never
/// destroyed. `stack_pointer` always points into `stack` once the task
/// has been created.
pub struct TaskControlBlock {
    /// Handle of this task.
    pub id: TaskId,

    /// Debug name.
    pub name: &'static str,

    /// Current execution state.
    pub state: TaskState,

    /// Priority given at creation.
    pub base_priority: Priority,

    /// Priority the scheduler uses. Equal to `base_priority` unless raised
    /// by priority inheritance.
    pub priority: Priority,

    /// Saved process stack pointer. Written at creation and on every switch
    /// away from the task.
    pub stack_pointer: *mut u32,

    /// The memory the task runs on.
    pub stack: StackRegion,

    /// Tick at which a Delayed task, or a Blocked task with a finite
    /// timeout, becomes ready.
    pub wake_time: Option<Instant>,

    pub(crate) link: Link,
    pub(crate) wake: Wake,

    /// Whether this slot holds a task.
    pub active: bool,
}

// SAFETY: `stack_pointer` and `stack` only ever point into the task's own
// `'static` stack, and TCBs are only touched inside critical sections.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    /// An unused arena slot.
    pub const EMPTY: TaskControlBlock = TaskControlBlock {
        id: TaskId(0),
        name: "",
        state: TaskState::Suspended,
        base_priority: Priority::Idle,
        priority: Priority::Idle,
        stack_pointer: core::ptr::null_mut(),
        stack: StackRegion::EMPTY,
        wake_time: None,
        link: Link::Detached,
        wake: Wake::None,
        active: false,
    };

    /// Fill a free slot with a new task and build its initial stack frame.
    /// The task starts Ready but is not linked into any list.
    pub(crate) fn init(
        &mut self,
        id: TaskId,
        name: &'static str,
        priority: Priority,
        stack: StackRegion,
        entry: TaskEntry,
    ) {
        self.id = id;
        self.name = name;
        self.state = TaskState::Ready;
        self.base_priority = priority;
        self.priority = priority;
        self.stack_pointer = stack.prepare(entry);
        self.stack = stack;
        self.wake_time = None;
        self.link = Link::Detached;
        self.wake = Wake::None;
        self.active = true;
    }

    /// Is the task Ready or Running?
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Is priority inheritance currently raising this task?
    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.priority > self.base_priority
    }

    /// Is the task linked into the wait list `key`?
    pub(crate) fn is_waiting_on(&self, key: WaitKey) -> bool {
        matches!(self.link, Link::Waiting { key: k, .. } if k == key)
    }

    /// The lock owner this task lends its priority to while it waits.
    pub(crate) fn holder(&self) -> Option<TaskId> {
        match self.link {
            Link::Waiting { holder, .. } => holder,
            _ => None,
        }
    }

    /// Snapshot for diagnostics.
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name,
            state: self.state,
            base_priority: self.base_priority,
            priority: self.priority,
            wake_time: self.wake_time,
            stack_size: self.stack.size(),
            stack_unused: self.stack.unused_bytes(),
        }
    }
}

/// Copy of a task's public state, safe to hold outside a critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub state: TaskState,
    pub base_priority: Priority,
    pub priority: Priority,
    pub wake_time: Option<Instant>,
    pub stack_size: usize,
    /// Stack bytes never touched since creation.
    pub stack_unused: usize,
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
