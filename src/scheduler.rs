//! # Scheduler
//!
//! Fixed-priority preemptive scheduling for TickOS. The scheduler is a plain
//! state machine over a fixed arena of task control blocks; it never touches
//! hardware. The kernel wraps one global instance in a critical-section
//! mutex and the port layer turns its switch requests into PendSV.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt:
//! 1. **Advance time**: increment the wrapping tick counter
//! 2. **Wake expired tasks**: every Delayed or Blocked task whose wake time
//!    has been reached becomes Ready (a Blocked one learns it timed out)
//! 3. **Select next task**: head of the highest non-empty ready list, or the
//!    idle task when the ready queue is empty
//! 4. **Request a switch**: if the selection differs from the current task
//!
//! ## Wait Lists
//!
//! A primitive's [`WaitList`] holds only a key. Blocked tasks carry that key
//! in their link slot, so the tick can expire a waiter without knowing which
//! primitive it waits on, and a waiter that is woken or suspended is simply
//! detached. Waiters are released highest priority first, FIFO among equals.
//!
//! ## Priority Inheritance
//!
//! A task blocked on a lock names the lock's holder in its link slot. A
//! holder's effective priority is recomputed from those links whenever a
//! waiter arrives or leaves (signaled, timed out, suspended, handed off),
//! and the change travels along a chain of holders that wait themselves.

use log::{debug, info, trace};

use crate::config::MAX_TASKS;
use crate::error::KernelError;
use crate::ready::ReadyQueue;
use crate::stack::StackRegion;
use crate::sync::SyncError;
use crate::task::{Link, Priority, TaskControlBlock, TaskEntry, TaskId, TaskInfo, TaskState, Wake};
use crate::time::{Deadline, Instant, MAX_TIMEOUT_TICKS};

// ---------------------------------------------------------------------------
// Wait lists
// ---------------------------------------------------------------------------

/// Identifies one wait list. Assigned the first time a task blocks on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(u32);

/// The set of tasks blocked on one primitive.
#[derive(Debug)]
pub struct WaitList {
    key: Option<WaitKey>,
}

impl WaitList {
    pub const fn new() -> Self {
        Self { key: None }
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: all task control blocks, the ready queue and
/// the tick counter.
///
/// ## Design Notes
///
/// - Tasks live in a fixed array and are addressed by [`TaskId`]
/// - The running task stays linked in its ready list while it runs
/// - The idle task is never linked into the ready queue; it is the
///   fallback when the queue is empty
/// - `current` is the task the scheduler chose; `on_cpu` is the task whose
///   registers are live. They differ between a switch request and the
///   context switch that honors it.
pub struct Scheduler {
    tasks: [TaskControlBlock; MAX_TASKS],
    task_count: usize,
    ready: ReadyQueue,
    current: Option<TaskId>,
    on_cpu: Option<TaskId>,
    idle: Option<TaskId>,
    tick_count: Instant,
    switch_requested: bool,
    started: bool,
    next_wait_key: u32,
    next_wait_seq: u32,
    context_switches: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// An empty scheduler with no tasks.
    pub const fn new() -> Self {
        Self::starting_at(Instant::ZERO)
    }

    /// An empty scheduler whose tick counter starts at `now` instead of zero.
    pub const fn starting_at(now: Instant) -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            task_count: 0,
            ready: ReadyQueue::new(),
            current: None,
            on_cpu: None,
            idle: None,
            tick_count: now,
            switch_requested: false,
            started: false,
            next_wait_key: 0,
            next_wait_seq: 0,
            context_switches: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Task setup
    // -----------------------------------------------------------------------

    /// Register a new task. It is Ready once this returns.
    ///
    /// # Errors
    /// - [`KernelError::AlreadyStarted`] after [`start`](Self::start)
    /// - [`KernelError::StackTooSmall`] / [`KernelError::StackMisaligned`]
    /// - [`KernelError::StackInUse`] if another task runs on this stack
    /// - [`KernelError::TooManyTasks`] when the arena is full
    pub fn create_task(
        &mut self,
        stack: StackRegion,
        priority: Priority,
        entry: TaskEntry,
        name: &'static str,
    ) -> Result<TaskId, KernelError> {
        let id = self.allocate(stack, priority, entry, name)?;
        self.ready.push_back(&mut self.tasks, id);
        info!("created task {} '{}' at {}", id, name, priority);
        self.verify_invariants();
        Ok(id)
    }

    /// Register the idle task. It runs at [`Priority::Idle`] whenever no
    /// other task is ready, and must never block, sleep or be suspended.
    pub fn install_idle_task(
        &mut self,
        stack: StackRegion,
        entry: TaskEntry,
    ) -> Result<TaskId, KernelError> {
        if self.idle.is_some() {
            return Err(KernelError::IdleTaskInstalled);
        }
        let id = self.allocate(stack, Priority::Idle, entry, "idle")?;
        self.idle = Some(id);
        debug!("installed idle task {}", id);
        Ok(id)
    }

    fn allocate(
        &mut self,
        stack: StackRegion,
        priority: Priority,
        entry: TaskEntry,
        name: &'static str,
    ) -> Result<TaskId, KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        stack.validate()?;
        let overlaps = self.tasks[..self.task_count].iter().any(|task| {
            let (base, top) = (task.stack.base() as usize, task.stack.top() as usize);
            (stack.base() as usize) < top && base < stack.top() as usize
        });
        if overlaps {
            return Err(KernelError::StackInUse);
        }
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::TooManyTasks);
        }

        let id = TaskId::new(self.task_count);
        self.tasks[id.index()].init(id, name, priority, stack, entry);
        self.task_count += 1;
        Ok(id)
    }

    /// Start scheduling. Selects the highest-priority ready task, marks it
    /// Running and raises the switch request that launches it.
    pub fn start(&mut self) -> Result<TaskId, KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        if self.idle.is_none() {
            return Err(KernelError::NoIdleTask);
        }
        self.started = true;
        self.reschedule();
        let first = self.current.ok_or(KernelError::NoIdleTask)?;
        info!("scheduler started with {} tasks, first {}", self.task_count, first);
        Ok(first)
    }

    // -----------------------------------------------------------------------
    // Timekeeping
    // -----------------------------------------------------------------------

    /// Advance time by one tick. Returns whether a different task should run.
    pub fn tick(&mut self) -> bool {
        self.tick_count = self.tick_count.add_ticks(1);
        if !self.started {
            return false;
        }
        self.wake_expired();
        self.reschedule()
    }

    fn wake_expired(&mut self) {
        let now = self.tick_count;
        for i in 0..self.task_count {
            let (id, state) = (self.tasks[i].id, self.tasks[i].state);
            let Some(wake_time) = self.tasks[i].wake_time else {
                continue;
            };
            if !now.has_reached(wake_time) {
                continue;
            }
            match state {
                TaskState::Delayed => {
                    trace!("{} delay elapsed {}", id, now);
                    self.make_ready(id, Wake::None);
                }
                TaskState::Blocked => {
                    trace!("{} wait timed out {}", id, now);
                    self.make_ready(id, Wake::TimedOut);
                }
                _ => self.tasks[i].wake_time = None,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Current-task transitions
    // -----------------------------------------------------------------------

    /// Let the other ready tasks of the current task's priority run first.
    pub fn yield_current(&mut self) {
        if let Some(current) = self.current {
            if Some(current) != self.idle && self.tasks[current.index()].state == TaskState::Running {
                self.ready.rotate(&mut self.tasks, current);
            }
        }
        self.reschedule();
    }

    /// Put the current task to sleep for `ticks` ticks. Zero yields.
    pub fn delay_current(&mut self, ticks: u32) -> Result<(), KernelError> {
        let wake = self.tick_count.add_ticks(ticks.min(MAX_TIMEOUT_TICKS));
        if ticks == 0 {
            self.sleepable_current()?;
            self.yield_current();
            return Ok(());
        }
        self.delay_until(wake)
    }

    /// Put the current task to sleep until the tick counter reaches `wake`.
    /// A wake time already reached yields instead.
    pub fn delay_until(&mut self, wake: Instant) -> Result<(), KernelError> {
        let current = self.sleepable_current()?;
        if self.tick_count.has_reached(wake) {
            self.yield_current();
            return Ok(());
        }
        self.ready.remove(&mut self.tasks, current);
        let task = &mut self.tasks[current.index()];
        task.state = TaskState::Delayed;
        task.wake_time = Some(wake);
        trace!("{} delayed until {}", current, wake);
        self.reschedule();
        Ok(())
    }

    fn sleepable_current(&self) -> Result<TaskId, KernelError> {
        let current = self.current.ok_or(KernelError::NotStarted)?;
        if Some(current) == self.idle {
            return Err(KernelError::IdleTask);
        }
        Ok(current)
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Move the current task from Running to Blocked on `list`, with `tag`
    /// recorded for the primitive's own use, and pick another task.
    ///
    /// # Errors
    /// [`SyncError::IdleTask`] if the idle task tries to block.
    pub fn block_current(
        &mut self,
        list: &mut WaitList,
        deadline: Deadline,
        tag: u32,
    ) -> Result<(), SyncError> {
        self.block(list, deadline, tag, None)
    }

    /// Block the current task on a lock owned by `holder`. While the wait
    /// lasts, `holder` runs at no less than the waiter's priority.
    pub fn block_current_on(
        &mut self,
        list: &mut WaitList,
        deadline: Deadline,
        holder: TaskId,
    ) -> Result<(), SyncError> {
        self.block(list, deadline, 0, Some(holder))
    }

    fn block(
        &mut self,
        list: &mut WaitList,
        deadline: Deadline,
        tag: u32,
        holder: Option<TaskId>,
    ) -> Result<(), SyncError> {
        debug_assert!(deadline.can_block());
        let current = self.current.ok_or(SyncError::NotRunning)?;
        if Some(current) == self.idle {
            return Err(SyncError::IdleTask);
        }
        let key = match list.key {
            Some(key) => key,
            None => {
                let key = WaitKey(self.next_wait_key);
                self.next_wait_key = self.next_wait_key.wrapping_add(1);
                list.key = Some(key);
                key
            }
        };
        let seq = self.next_wait_seq;
        self.next_wait_seq = self.next_wait_seq.wrapping_add(1);

        self.ready.remove(&mut self.tasks, current);
        let task = &mut self.tasks[current.index()];
        task.link = Link::Waiting { key, seq, tag, holder };
        task.state = TaskState::Blocked;
        task.wake_time = deadline.wake_time();
        task.wake = Wake::None;
        trace!("{} blocked on {:?} until {:?}", current, key, deadline);
        if let Some(holder) = holder {
            self.refresh_priority(holder);
        }
        self.reschedule();
        Ok(())
    }

    /// Wake the best waiter on `list`, passing it `value`. Returns the task
    /// woken, if any.
    pub fn unblock_one(&mut self, list: &WaitList, value: u32) -> Option<TaskId> {
        let woken = self.best_waiter(list, |_| true)?;
        self.make_ready(woken, Wake::Signaled(value));
        self.reschedule();
        Some(woken)
    }

    /// Wake every waiter on `list`, highest priority first. Returns how
    /// many were woken.
    pub fn unblock_all(&mut self, list: &WaitList, value: u32) -> usize {
        self.unblock_where(list, |_| Some(value))
    }

    /// Wake every waiter on `list` for which `accept(tag)` returns a value,
    /// highest priority first, handing that value to the waiter.
    pub fn unblock_where<F>(&mut self, list: &WaitList, accept: F) -> usize
    where
        F: Fn(u32) -> Option<u32>,
    {
        let mut woken = 0;
        while let Some(id) = self.best_waiter(list, |tag| accept(tag).is_some()) {
            let value = match self.tasks[id.index()].link {
                Link::Waiting { tag, .. } => accept(tag).unwrap_or(0),
                _ => 0,
            };
            self.make_ready(id, Wake::Signaled(value));
            woken += 1;
        }
        if woken > 0 {
            self.reschedule();
        }
        woken
    }

    /// Pass a lock from `holder` to the best waiter on `list`. The waiters
    /// left behind lend their priority to the new holder, and `holder`
    /// drops to what the locks it still owns require. Returns the new
    /// holder, if any.
    pub fn pass_ownership(&mut self, list: &WaitList, holder: TaskId) -> Option<TaskId> {
        let next = self.best_waiter(list, |_| true);
        if let (Some(next), Some(key)) = (next, list.key) {
            self.make_ready(next, Wake::Signaled(0));
            for task in &mut self.tasks[..self.task_count] {
                if let Link::Waiting { key: k, holder: lends_to, .. } = &mut task.link {
                    if *k == key {
                        *lends_to = Some(next);
                    }
                }
            }
            self.refresh_priority(next);
        }
        self.refresh_priority(holder);
        self.reschedule();
        next
    }

    /// Priority of the best waiter on `list`.
    pub fn highest_waiter_priority(&self, list: &WaitList) -> Option<Priority> {
        self.best_waiter(list, |_| true)
            .map(|id| self.tasks[id.index()].priority)
    }

    /// Does anyone wait on `list`?
    pub fn has_waiters(&self, list: &WaitList) -> bool {
        self.best_waiter(list, |_| true).is_some()
    }

    fn best_waiter<F>(&self, list: &WaitList, accept: F) -> Option<TaskId>
    where
        F: Fn(u32) -> bool,
    {
        let key = list.key?;
        let mut best: Option<(Priority, u32, TaskId)> = None;
        for task in &self.tasks[..self.task_count] {
            if !task.is_waiting_on(key) {
                continue;
            }
            let Link::Waiting { seq, tag, .. } = task.link else {
                continue;
            };
            if !accept(tag) {
                continue;
            }
            let better = match best {
                None => true,
                Some((priority, best_seq, _)) => {
                    task.priority > priority
                        || (task.priority == priority && (seq.wrapping_sub(best_seq) as i32) < 0)
                }
            };
            if better {
                best = Some((task.priority, seq, task.id));
            }
        }
        best.map(|(_, _, id)| id)
    }

    /// Take the wake reason recorded for the current task.
    pub fn take_wake(&mut self) -> Wake {
        match self.current {
            Some(current) => core::mem::replace(&mut self.tasks[current.index()].wake, Wake::None),
            None => Wake::None,
        }
    }

    fn make_ready(&mut self, id: TaskId, wake: Wake) {
        let holder = self.tasks[id.index()].holder();
        let task = &mut self.tasks[id.index()];
        task.link = Link::Detached;
        task.wake_time = None;
        task.wake = wake;
        task.state = TaskState::Ready;
        self.ready.push_back(&mut self.tasks, id);
        if let Some(holder) = holder {
            self.refresh_priority(holder);
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Change the priority the scheduler uses for `id`, keeping its base
    /// priority. A blocked lock waiter passes the change on to the holder.
    pub fn set_effective_priority(&mut self, id: TaskId, priority: Priority) {
        if Some(id) == self.idle || self.tasks[id.index()].priority == priority {
            return;
        }
        self.apply_priority(id, priority);
        if let Some(holder) = self.tasks[id.index()].holder() {
            self.refresh_priority(holder);
        }
        self.reschedule();
    }

    /// Recompute the effective priority of `id`: its base priority, raised
    /// to that of the highest task waiting on a lock it holds. A change
    /// travels on to the holder `id` itself waits for, if any.
    fn refresh_priority(&mut self, id: TaskId) {
        let mut next = Some(id);
        // Bounded: a chain visits each task at most once unless it is a
        // deadlock cycle
        for _ in 0..self.task_count {
            let Some(id) = next.take() else {
                break;
            };
            if Some(id) == self.idle {
                break;
            }
            let needed = self.tasks[..self.task_count]
                .iter()
                .filter(|task| task.holder() == Some(id))
                .map(|task| task.priority)
                .fold(self.tasks[id.index()].base_priority, Priority::max);
            if needed == self.tasks[id.index()].priority {
                break;
            }
            debug!("{} runs at {}", id, needed);
            self.apply_priority(id, needed);
            next = self.tasks[id.index()].holder();
        }
    }

    fn apply_priority(&mut self, id: TaskId, priority: Priority) {
        let linked = matches!(self.tasks[id.index()].link, Link::Ready { .. });
        if linked {
            self.ready.remove(&mut self.tasks, id);
        }
        self.tasks[id.index()].priority = priority;
        if linked {
            self.ready.push_back(&mut self.tasks, id);
        }
    }

    /// Take `id` out of scheduling until [`resume`](Self::resume). A Blocked
    /// task leaves its wait list, stops lending its priority to a lock
    /// holder, and retries its blocking call once resumed.
    pub fn suspend(&mut self, id: TaskId) -> Result<(), KernelError> {
        self.check_task(id)?;
        match self.tasks[id.index()].state {
            TaskState::Suspended => return Ok(()),
            TaskState::Ready | TaskState::Running => {
                self.ready.remove(&mut self.tasks, id);
            }
            TaskState::Blocked => {
                let holder = self.tasks[id.index()].holder();
                self.tasks[id.index()].link = Link::Detached;
                self.tasks[id.index()].wake = Wake::Interrupted;
                if let Some(holder) = holder {
                    self.refresh_priority(holder);
                }
            }
            TaskState::Delayed => {}
        }
        let task = &mut self.tasks[id.index()];
        task.state = TaskState::Suspended;
        task.wake_time = None;
        debug!("suspended {}", id);
        self.reschedule();
        Ok(())
    }

    /// Return a suspended task to the ready queue.
    pub fn resume(&mut self, id: TaskId) -> Result<(), KernelError> {
        self.check_task(id)?;
        if self.tasks[id.index()].state != TaskState::Suspended {
            return Err(KernelError::NotSuspended(id));
        }
        self.tasks[id.index()].state = TaskState::Ready;
        self.ready.push_back(&mut self.tasks, id);
        debug!("resumed {}", id);
        self.reschedule();
        Ok(())
    }

    fn check_task(&self, id: TaskId) -> Result<(), KernelError> {
        if id.index() >= self.task_count {
            return Err(KernelError::InvalidTask(id));
        }
        if Some(id) == self.idle {
            return Err(KernelError::IdleTask);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Switching
    // -----------------------------------------------------------------------

    /// The task that should run now: head of the highest ready list, or idle.
    pub fn highest_ready(&self) -> Option<TaskId> {
        self.ready.highest().or(self.idle)
    }

    /// Make the highest ready task the Running one. Returns whether it
    /// changed.
    ///
    /// # Panics
    /// If no task is runnable and there is no idle task.
    pub fn reschedule(&mut self) -> bool {
        if !self.started {
            return false;
        }
        let Some(next) = self.highest_ready() else {
            panic!("no runnable task and no idle task");
        };
        let prev = self.current;
        if prev == Some(next) {
            self.verify_invariants();
            return false;
        }
        if let Some(prev) = prev {
            let task = &mut self.tasks[prev.index()];
            if task.state == TaskState::Running {
                task.state = TaskState::Ready;
            }
        }
        self.tasks[next.index()].state = TaskState::Running;
        self.current = Some(next);
        self.switch_requested = true;
        self.context_switches = self.context_switches.wrapping_add(1);
        trace!("switch {:?} -> {} {}", prev, next, self.tick_count);
        self.verify_invariants();
        true
    }

    /// Clear and return the switch request.
    pub fn take_switch_request(&mut self) -> bool {
        core::mem::replace(&mut self.switch_requested, false)
    }

    /// Context-switch glue for the trampoline: record `saved_sp` for the
    /// task that was on the CPU and return the stack pointer of the task to
    /// run. Makes no scheduling decision.
    ///
    /// # Panics
    /// If the outgoing task overflowed its stack (with `stack-check`), or if
    /// the scheduler has not started.
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> *mut u32 {
        if let Some(outgoing) = self.on_cpu {
            self.tasks[outgoing.index()].stack_pointer = saved_sp;
            #[cfg(feature = "stack-check")]
            self.check_stack(outgoing);
        }
        let Some(incoming) = self.current else {
            panic!("context switch before the scheduler started");
        };
        self.on_cpu = Some(incoming);
        self.tasks[incoming.index()].stack_pointer
    }

    #[cfg(feature = "stack-check")]
    fn check_stack(&self, id: TaskId) {
        let task = &self.tasks[id.index()];
        let in_bounds = task.stack.contains(task.stack_pointer)
            && task.stack_pointer as usize > task.stack.base() as usize;
        if !in_bounds || !task.stack.canary_intact() {
            log::error!("stack overflow in {} '{}'", id, task.name);
            panic!("stack overflow in task {}", id);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current tick count.
    #[inline]
    pub fn now(&self) -> Instant {
        self.tick_count
    }

    /// The Running task.
    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// The idle task, once installed.
    #[inline]
    pub fn idle_task(&self) -> Option<TaskId> {
        self.idle
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of tasks, idle included.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Number of times the Running task changed.
    #[inline]
    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    #[inline]
    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.tasks[..self.task_count].get(id.index())
    }

    pub fn tasks(&self) -> &[TaskControlBlock] {
        &self.tasks[..self.task_count]
    }

    /// Effective priority of `id`.
    pub fn priority_of(&self, id: TaskId) -> Priority {
        self.tasks[id.index()].priority
    }

    pub fn state_of(&self, id: TaskId) -> TaskState {
        self.tasks[id.index()].state
    }

    pub fn task_info(&self, id: TaskId) -> Result<TaskInfo, KernelError> {
        self.task(id).map(TaskControlBlock::info).ok_or(KernelError::InvalidTask(id))
    }

    // -----------------------------------------------------------------------
    // Invariants
    // -----------------------------------------------------------------------

    /// Check the ready-queue bitmap and the single-runner rule.
    pub fn check_invariants(&self) -> bool {
        if !self.ready.is_consistent(&self.tasks) {
            return false;
        }
        if !self.started {
            return true;
        }
        let mut running = self.tasks[..self.task_count]
            .iter()
            .filter(|task| task.state == TaskState::Running);
        let only = running.next().map(|task| task.id);
        running.next().is_none() && only.is_some() && only == self.current
    }

    #[inline]
    fn verify_invariants(&self) {
        debug_assert!(self.check_invariants(), "scheduler invariant violated");
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;
    use crate::time::Timeout;

    fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> StackRegion {
        let stack: &'static Stack<512> = Box::leak(Box::new(Stack::new()));
        stack.region()
    }

    fn scheduler_with(priorities: &[Priority]) -> (Scheduler, [TaskId; 4]) {
        let mut sched = Scheduler::new();
        sched.install_idle_task(stack(), spin).unwrap();
        let mut ids = [TaskId::new(0); 4];
        for (i, priority) in priorities.iter().enumerate() {
            ids[i] = sched.create_task(stack(), *priority, spin, "task").unwrap();
        }
        (sched, ids)
    }

    #[test]
    fn test_start_requires_idle_task() {
        let mut sched = Scheduler::new();
        sched.create_task(stack(), Priority::Normal, spin, "a").unwrap();
        assert_eq!(sched.start(), Err(KernelError::NoIdleTask));
    }

    #[test]
    fn test_start_selects_highest() {
        let (mut sched, ids) = scheduler_with(&[Priority::Low, Priority::High]);
        assert_eq!(sched.start(), Ok(ids[1]));
        assert_eq!(sched.state_of(ids[1]), TaskState::Running);
        assert_eq!(sched.state_of(ids[0]), TaskState::Ready);
        assert!(sched.take_switch_request());
        assert!(!sched.take_switch_request());
        assert_eq!(sched.start(), Err(KernelError::AlreadyStarted));
        assert_eq!(
            sched.create_task(stack(), Priority::Low, spin, "late"),
            Err(KernelError::AlreadyStarted)
        );
    }

    #[test]
    fn test_idle_runs_when_nothing_ready() {
        let (mut sched, _) = scheduler_with(&[]);
        let idle = sched.idle_task().unwrap();
        assert_eq!(sched.start(), Ok(idle));
        assert!(sched.ready_queue().is_empty());
        assert_eq!(sched.delay_current(5), Err(KernelError::IdleTask));
        assert_eq!(sched.suspend(idle), Err(KernelError::IdleTask));
    }

    #[test]
    fn test_create_task_rejects_reused_stack() {
        let mut sched = Scheduler::new();
        let region = stack();
        sched.create_task(region, Priority::Low, spin, "a").unwrap();
        assert_eq!(
            sched.create_task(region, Priority::Low, spin, "b"),
            Err(KernelError::StackInUse)
        );
    }

    #[test]
    fn test_create_task_fills_arena() {
        let mut sched = Scheduler::new();
        for _ in 0..MAX_TASKS {
            sched.create_task(stack(), Priority::Low, spin, "t").unwrap();
        }
        assert_eq!(
            sched.create_task(stack(), Priority::Low, spin, "t"),
            Err(KernelError::TooManyTasks)
        );
        assert_eq!(
            sched.install_idle_task(stack(), spin),
            Err(KernelError::TooManyTasks)
        );
    }

    #[test]
    fn test_delay_wakes_on_exact_tick() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        sched.start().unwrap();
        sched.delay_current(3).unwrap();
        assert_eq!(sched.state_of(ids[0]), TaskState::Delayed);
        assert_eq!(sched.current(), Some(ids[1]));

        assert!(!sched.tick());
        assert!(!sched.tick());
        assert_eq!(sched.current(), Some(ids[1]));
        assert!(sched.tick());
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sched.state_of(ids[1]), TaskState::Ready);
    }

    #[test]
    fn test_yield_rotates_equal_priorities() {
        let (mut sched, ids) = scheduler_with(&[Priority::Normal, Priority::Normal, Priority::Low]);
        sched.start().unwrap();
        assert_eq!(sched.current(), Some(ids[0]));
        sched.yield_current();
        assert_eq!(sched.current(), Some(ids[1]));
        sched.yield_current();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sched.context_switches(), 3);
    }

    #[test]
    fn test_yield_alone_keeps_running() {
        let (mut sched, ids) = scheduler_with(&[Priority::Normal, Priority::Low]);
        sched.start().unwrap();
        sched.take_switch_request();
        sched.yield_current();
        assert_eq!(sched.current(), Some(ids[0]));
        assert!(!sched.take_switch_request());
    }

    #[test]
    fn test_block_and_unblock_by_priority() {
        let (mut sched, ids) =
            scheduler_with(&[Priority::Normal, Priority::High, Priority::Normal, Priority::Low]);
        let mut list = WaitList::new();
        sched.start().unwrap();

        // High, then the two Normal tasks block in creation order
        let forever = Deadline::new(sched.now(), Timeout::Infinite);
        for expected in [ids[1], ids[0], ids[2]] {
            assert_eq!(sched.current(), Some(expected));
            sched.block_current(&mut list, forever, 0).unwrap();
        }
        assert_eq!(sched.current(), Some(ids[3]));
        assert_eq!(sched.highest_waiter_priority(&list), Some(Priority::High));

        assert_eq!(sched.unblock_one(&list, 7), Some(ids[1]));
        assert_eq!(sched.current(), Some(ids[1]));
        assert_eq!(sched.take_wake(), Wake::Signaled(7));
        assert_eq!(sched.take_wake(), Wake::None);

        assert_eq!(sched.unblock_one(&list, 0), Some(ids[0]));
        assert_eq!(sched.unblock_one(&list, 0), Some(ids[2]));
        assert_eq!(sched.unblock_one(&list, 0), None);
        assert!(!sched.has_waiters(&list));
    }

    #[test]
    fn test_blocked_task_times_out() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        let mut list = WaitList::new();
        sched.start().unwrap();

        let deadline = Deadline::new(sched.now(), Timeout::Ticks(2));
        sched.block_current(&mut list, deadline, 0).unwrap();
        assert_eq!(sched.state_of(ids[0]), TaskState::Blocked);
        sched.tick();
        assert_eq!(sched.state_of(ids[0]), TaskState::Blocked);
        sched.tick();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sched.take_wake(), Wake::TimedOut);
        assert!(!sched.has_waiters(&list));
    }

    #[test]
    fn test_unblock_where_filters_by_tag() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Normal, Priority::Low]);
        let mut list = WaitList::new();
        sched.start().unwrap();
        let forever = Deadline::Never;
        sched.block_current(&mut list, forever, 0b01).unwrap();
        sched.block_current(&mut list, forever, 0b10).unwrap();
        assert_eq!(sched.current(), Some(ids[2]));

        let woken = sched.unblock_where(&list, |tag| (tag & 0b10 != 0).then_some(tag));
        assert_eq!(woken, 1);
        assert_eq!(sched.current(), Some(ids[1]));
        assert_eq!(sched.take_wake(), Wake::Signaled(0b10));
        assert_eq!(sched.state_of(ids[0]), TaskState::Blocked);
        assert_eq!(sched.unblock_all(&list, 0), 1);
        assert_eq!(sched.current(), Some(ids[0]));
    }

    #[test]
    fn test_suspend_and_resume() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        sched.start().unwrap();

        sched.suspend(ids[0]).unwrap();
        assert_eq!(sched.current(), Some(ids[1]));
        assert_eq!(sched.state_of(ids[0]), TaskState::Suspended);
        assert_eq!(sched.resume(ids[1]), Err(KernelError::NotSuspended(ids[1])));

        sched.resume(ids[0]).unwrap();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sched.suspend(TaskId::new(9)), Err(KernelError::InvalidTask(TaskId::new(9))));
    }

    #[test]
    fn test_suspend_blocked_task_interrupts_wait() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        let mut list = WaitList::new();
        sched.start().unwrap();
        sched.block_current(&mut list, Deadline::Never, 0).unwrap();

        sched.suspend(ids[0]).unwrap();
        assert!(!sched.has_waiters(&list));
        sched.resume(ids[0]).unwrap();
        assert_eq!(sched.current(), Some(ids[0]));
        assert_eq!(sched.take_wake(), Wake::Interrupted);
    }

    #[test]
    fn test_idle_task_cannot_block() {
        let (mut sched, _) = scheduler_with(&[]);
        let mut list = WaitList::new();
        sched.start().unwrap();
        assert_eq!(
            sched.block_current(&mut list, Deadline::Never, 0),
            Err(SyncError::IdleTask)
        );
        assert_eq!(sched.current(), sched.idle_task());
        assert!(sched.check_invariants());
    }

    #[test]
    fn test_inheritance_follows_chain_of_holders() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Normal, Priority::Low]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let (mut held_by_c, mut held_by_b) = (WaitList::new(), WaitList::new());
        sched.start().unwrap();

        sched.delay_current(2).unwrap();
        sched.delay_current(1).unwrap();
        assert_eq!(sched.current(), Some(c));

        sched.tick();
        assert_eq!(sched.current(), Some(b));
        sched.block_current_on(&mut held_by_c, Deadline::Never, c).unwrap();
        assert_eq!(sched.priority_of(c), Priority::Normal);

        // a waits on b, which waits on c: both are raised
        sched.tick();
        assert_eq!(sched.current(), Some(a));
        sched.block_current_on(&mut held_by_b, Deadline::Never, b).unwrap();
        assert_eq!(sched.priority_of(b), Priority::High);
        assert_eq!(sched.priority_of(c), Priority::High);
        assert_eq!(sched.current(), Some(c));

        sched.suspend(a).unwrap();
        assert_eq!(sched.priority_of(b), Priority::Normal);
        assert_eq!(sched.priority_of(c), Priority::Normal);
        assert!(sched.check_invariants());
    }

    #[test]
    fn test_priority_change_moves_ready_task() {
        let (mut sched, ids) = scheduler_with(&[Priority::Normal, Priority::Low]);
        sched.start().unwrap();
        sched.set_effective_priority(ids[1], Priority::Critical);
        assert_eq!(sched.current(), Some(ids[1]));
        assert!(sched.task(ids[1]).unwrap().is_boosted());
        sched.set_effective_priority(ids[1], Priority::Low);
        assert_eq!(sched.current(), Some(ids[0]));
        assert!(sched.check_invariants());
    }

    #[test]
    fn test_switch_context_tracks_stack_pointers() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        sched.start().unwrap();

        let first_sp = sched.task(ids[0]).unwrap().stack_pointer;
        assert_eq!(sched.switch_context(core::ptr::null_mut()), first_sp);

        sched.suspend(ids[0]).unwrap();
        let saved = first_sp.wrapping_sub(4);
        let low_sp = sched.task(ids[1]).unwrap().stack_pointer;
        assert_eq!(sched.switch_context(saved), low_sp);
        assert_eq!(sched.task(ids[0]).unwrap().stack_pointer, saved);
    }

    #[cfg(feature = "stack-check")]
    #[test]
    #[should_panic(expected = "stack overflow")]
    fn test_switch_context_detects_overflow() {
        let (mut sched, ids) = scheduler_with(&[Priority::High, Priority::Low]);
        sched.start().unwrap();
        sched.switch_context(core::ptr::null_mut());

        let base = sched.task(ids[0]).unwrap().stack.base();
        // SAFETY: `base` is the canary word of a leaked test stack.
        unsafe { base.write_volatile(0) };
        sched.suspend(ids[0]).unwrap();
        let sp = sched.task(ids[0]).unwrap().stack_pointer;
        sched.switch_context(sp);
    }
}
