//! # Cortex-M Port Layer
//!
//! Hardware-specific code for ARM Cortex-M processors (Armv6-M, Armv7-M,
//! Armv7E-M with or without FPU, Armv8-M). Implements context switching via
//! PendSV, SysTick timer configuration, and first-task launch.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0-R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV pushes the rest below that frame:
//!
//! ```text
//!   high   ┌──────────────┐
//!          │ xPSR .. R0   │ hardware frame (8 words)
//!          ├──────────────┤
//!          │ S16-S31      │ only if EXC_RETURN bit 4 is clear (FPU used)
//!          ├──────────────┤
//!          │ EXC_RETURN   │
//!          │ R11 .. R4    │ software frame (9 words)
//!   low    └──────────────┘ ◄── saved stack pointer
//! ```
//!
//! The saved stack pointer goes to [`kernel::switch_context`], which returns
//! the incoming task's; the incoming frame is unstacked in reverse.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: 0x80, above PendSV so ticks are never delayed by a switch
//! - PendSV: 0xFF (lowest), runs only when no other handler is active

use core::arch::naked_asm;

use ::cortex_m::asm;
use ::cortex_m::interrupt;
use ::cortex_m::peripheral::scb::{SystemHandler, VectActive};
use ::cortex_m::peripheral::syst::SystClkSource;
use ::cortex_m::peripheral::{SCB, SYST};
use ::cortex_m::register::psp;

use crate::config::{MIN_STACK_SIZE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel;
use crate::stack::Stack;

const SYSTICK_PRIORITY: u8 = 0x80;
const PENDSV_PRIORITY: u8 = 0xFF;

/// Where PSP points before the first switch. PendSV stacks the start-up
/// context here and it is never resumed.
static SCRATCH_STACK: Stack<MIN_STACK_SIZE> = Stack::new();

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Core clock cycles per tick, minus one. SysTick counts in 24 bits.
const SYSTICK_RELOAD: u32 = {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    assert!(reload <= 0x00FF_FFFF, "tick period does not fit the SysTick counter");
    reload
};

/// Start the kernel tick: SysTick from the core clock at `TICK_HZ`, with
/// its interrupt enabled. The counter is stopped while it is reprogrammed.
pub fn configure_systick(syst: &mut SYST) {
    syst.disable_counter();
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYSTICK_RELOAD);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// SysTick above PendSV, PendSV lowest.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY);
        scb.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
    }
}

// ---------------------------------------------------------------------------
// Port interface
// ---------------------------------------------------------------------------

/// Pend PendSV. The switch happens once no other handler is active and
/// interrupts are enabled.
#[inline]
pub fn request_context_switch() {
    SCB::set_pendsv();
}

/// Let a PendSV pended from thread mode fire before returning.
#[inline]
pub fn wait_for_switch() {
    asm::dsb();
    asm::isb();
}

#[inline]
pub fn in_interrupt() -> bool {
    !matches!(SCB::vect_active(), VectActive::ThreadMode)
}

pub fn idle_entry() -> ! {
    loop {
        asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Launch the task the scheduler selected. Called once, with interrupts
/// disabled, after the scheduler has started.
///
/// Points PSP at a scratch stack and pends PendSV. The first switch saves
/// a throwaway context there and exception-returns into the first task.
pub fn start_first_task() -> ! {
    unsafe {
        psp::write(SCRATCH_STACK.region().top() as u32);
    }
    SCB::set_pendsv();
    unsafe {
        interrupt::enable();
    }
    asm::isb();
    loop {
        asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// Called from PendSV with the outgoing software frame in r0; returns the
/// incoming one.
extern "C" fn pendsv_switch(saved_sp: *mut u32) -> *mut u32 {
    kernel::switch_context(saved_sp)
}

/// PendSV for Armv7-M and Armv8-M Mainline, soft-float.
///
/// Only r0-r3 and r12 may be touched before the save; they were stacked by
/// the hardware.
#[cfg(all(not(armv6m), not(has_fpu)))]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// PendSV for Armv7E-M and Armv8-M Mainline, hard-float. S16-S31 are
/// stacked only for tasks that used the FPU (EXC_RETURN bit 4 clear).
#[cfg(all(not(armv6m), has_fpu))]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // Workaround https://github.com/rust-lang/rust/issues/127269
        ".fpu vfpv3",
        "mrs r0, psp",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// PendSV for Armv6-M and Armv8-M Baseline. Builds the same frame with
/// the v6-M subset: no `stmdb`, and `ldm`/`stm` reach only r0-r7.
#[cfg(armv6m)]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // Save: r4-r7, then r8-r11 through r4-r7, then EXC_RETURN
        "mrs r0, psp",
        "subs r0, #36",
        "stmia r0!, {{r4-r7}}",
        "mov r4, r8",
        "mov r5, r9",
        "mov r6, r10",
        "mov r7, r11",
        "stmia r0!, {{r4-r7}}",
        "mov r1, lr",
        "str r1, [r0]",
        "subs r0, #32",
        "bl {switch}",
        // Restore: r8-r11 and EXC_RETURN first, r4-r7 last
        "adds r0, #16",
        "ldmia r0!, {{r4-r7}}",
        "mov r8, r4",
        "mov r9, r5",
        "mov r10, r6",
        "mov r11, r7",
        "ldmia r0!, {{r1}}",
        "mov lr, r1",
        "msr psp, r0",
        "subs r0, #36",
        "ldmia r0!, {{r4-r7}}",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick entry point, at `TICK_HZ`.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    kernel::on_tick();
}
