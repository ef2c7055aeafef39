//! # Kernel
//!
//! The global kernel instance and the task-facing API of TickOS.
//!
//! One [`Scheduler`] lives in a `critical_section::Mutex<RefCell<_>>`. Every
//! function here borrows it inside a critical section, lets the scheduler
//! decide, and, once the section is left, pends PendSV if the decision was a
//! different task.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Install the idle task
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Select the first task
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Pend PendSV; the first switch launches the task
//! ```

use core::cell::RefCell;
use core::task::Poll;

use crate::arch;
use crate::config::IDLE_STACK_SIZE;
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::stack::Stack;
use crate::sync::{self, SyncError};
use crate::task::{Priority, TaskEntry, TaskId, TaskInfo};
use crate::time::{ms_to_ticks, Deadline, Instant, Timeout};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// The global scheduler. Only reached through [`with`] and the functions
/// below; the PendSV and SysTick handlers go through [`switch_context`] and
/// [`on_tick`].
static KERNEL: critical_section::Mutex<RefCell<Scheduler>> =
    critical_section::Mutex::new(RefCell::new(Scheduler::new()));

static IDLE_STACK: Stack<IDLE_STACK_SIZE> = Stack::new();

/// Run `f` against the global scheduler inside a critical section, then pend
/// a context switch if `f` made the scheduler pick a different task.
///
/// Usable from task and interrupt context. `f` must not block.
pub fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let (result, switch) = sync::critical_section(|cs| {
        let mut sched = KERNEL.borrow_ref_mut(cs);
        let result = f(&mut sched);
        (result, sched.take_switch_request())
    });
    if switch {
        arch::request_context_switch();
    }
    result
}

/// Drive a kernel-context operation to completion on behalf of the calling
/// task.
///
/// `timeout` is resolved to a deadline once, here. `attempt` then runs
/// until it returns `Poll::Ready`; each `Poll::Pending` means it blocked the
/// caller, and the next attempt happens once the caller runs again.
///
/// # Errors
/// - [`SyncError::InterruptContext`] for a blocking call from an interrupt
///   handler
/// - [`SyncError::NotRunning`] before the scheduler has started
/// - whatever `attempt` returns
pub fn block_on<T, F>(timeout: Timeout, mut attempt: F) -> Result<T, SyncError>
where
    F: FnMut(&mut Scheduler, Deadline) -> Poll<Result<T, SyncError>>,
{
    if arch::in_interrupt() && !timeout.is_no_wait() {
        return Err(SyncError::InterruptContext);
    }
    let (caller, deadline) = with(|sched| (sched.current(), Deadline::new(sched.now(), timeout)));
    let caller = caller.ok_or(SyncError::NotRunning)?;
    loop {
        let poll = with(|sched| {
            // Blocked, but PendSV has not switched us out yet
            if sched.current() != Some(caller) {
                return Poll::Pending;
            }
            attempt(sched, deadline)
        });
        match poll {
            Poll::Ready(result) => return result,
            Poll::Pending => arch::wait_for_switch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the TickOS kernel by installing its idle task.
///
/// Must be called once, before [`start`].
pub fn init() -> Result<TaskId, KernelError> {
    with(|sched| sched.install_idle_task(IDLE_STACK.region(), arch::idle_entry))
}

/// Create a new task and register it with the scheduler.
///
/// # Parameters
/// - `stack`: the task's stack; a `static` it keeps for its whole life
/// - `priority`: fixed base priority
/// - `entry`: task entry function, which must never return
/// - `name`: shown in diagnostics
///
/// # Example
/// ```ignore
/// static SENSOR_STACK: Stack<1024> = Stack::new();
///
/// kernel::create_task(&SENSOR_STACK, Priority::High, sensor_task, "sensor")?;
/// ```
pub fn create_task<const N: usize>(
    stack: &'static Stack<N>,
    priority: Priority,
    entry: TaskEntry,
    name: &'static str,
) -> Result<TaskId, KernelError> {
    with(|sched| sched.create_task(stack.region(), priority, entry, name))
}

/// Start the TickOS scheduler. **Does not return.**
///
/// Selects the highest-priority task, configures SysTick, sets interrupt
/// priorities and pends the first context switch.
///
/// # Panics
/// If [`init`] was not called or the scheduler already runs.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m::interrupt::disable();

    // Not through `with`: PSP must point at the scratch frame before
    // PendSV may run
    let first = sync::critical_section(|cs| {
        let mut sched = KERNEL.borrow_ref_mut(cs);
        let first = sched.start();
        sched.take_switch_request();
        first
    });
    if let Err(err) = first {
        log::error!("cannot start scheduler: {}", err);
        panic!("cannot start scheduler: {}", err);
    }

    arch::configure_systick(&mut core_peripherals.SYST);
    arch::set_interrupt_priorities(&mut core_peripherals.SCB);
    arch::start_first_task()
}

/// Voluntarily yield the CPU to the other ready tasks of the same priority.
pub fn yield_task() -> Result<(), KernelError> {
    task_only()?;
    with(|sched| sched.yield_current());
    arch::wait_for_switch();
    Ok(())
}

/// Sleep for `ticks` ticks. Zero yields.
pub fn delay(ticks: u32) -> Result<(), KernelError> {
    task_only()?;
    with(|sched| sched.delay_current(ticks))?;
    arch::wait_for_switch();
    Ok(())
}

/// Sleep for at least `ms` milliseconds.
pub fn delay_ms(ms: u32) -> Result<(), KernelError> {
    delay(ms_to_ticks(ms))
}

/// Sleep until the tick counter reaches `wake`. For periodic tasks:
///
/// ```ignore
/// let mut next = kernel::now();
/// loop {
///     next = next.add_ticks(PERIOD);
///     kernel::delay_until(next)?;
///     sample();
/// }
/// ```
pub fn delay_until(wake: Instant) -> Result<(), KernelError> {
    task_only()?;
    with(|sched| sched.delay_until(wake))?;
    arch::wait_for_switch();
    Ok(())
}

/// Current tick count.
pub fn now() -> Instant {
    sync::critical_section(|cs| KERNEL.borrow_ref(cs).now())
}

/// The Running task, once the scheduler has started.
pub fn current_task() -> Option<TaskId> {
    sync::critical_section(|cs| KERNEL.borrow_ref(cs).current())
}

/// Take `id` out of scheduling until [`resume`] is called for it. A task
/// may suspend itself.
pub fn suspend(id: TaskId) -> Result<(), KernelError> {
    with(|sched| sched.suspend(id))?;
    if !arch::in_interrupt() {
        arch::wait_for_switch();
    }
    Ok(())
}

/// Make a suspended task ready again. Usable from interrupt handlers.
pub fn resume(id: TaskId) -> Result<(), KernelError> {
    with(|sched| sched.resume(id))
}

/// Diagnostic snapshot of a task, including its stack high-water mark.
pub fn task_info(id: TaskId) -> Result<TaskInfo, KernelError> {
    sync::critical_section(|cs| KERNEL.borrow_ref(cs).task_info(id))
}

fn task_only() -> Result<(), KernelError> {
    if arch::in_interrupt() {
        return Err(KernelError::InterruptContext);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Port entry points
// ---------------------------------------------------------------------------

/// Tick interrupt body: advance time and pend a switch if needed.
pub fn on_tick() {
    with(|sched| {
        sched.tick();
    });
}

/// Context-switch body, called by the PendSV trampoline with the outgoing
/// task's saved stack pointer. Returns the incoming task's stack pointer.
pub fn switch_context(saved_sp: *mut u32) -> *mut u32 {
    sync::critical_section(|cs| KERNEL.borrow_ref_mut(cs).switch_context(saved_sp))
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
