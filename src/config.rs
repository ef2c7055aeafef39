//! # TickOS Configuration
//!
//! Compile-time constants governing the kernel and its Cortex-M port.
//! All limits are fixed at compile time; the kernel never allocates.

/// Maximum number of tasks the kernel can manage, the idle task included.
/// This bounds the static TCB arena inside the scheduler.
pub const MAX_TASKS: usize = 16;

/// Number of priority levels. Level 0 is the lowest and belongs to the
/// idle task; level 7 is the highest. The ready-queue bitmap is one byte,
/// so this cannot grow past 8.
pub const NUM_PRIORITIES: usize = 8;

/// SysTick frequency in Hz. One tick is 1 ms at the default.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Alignment of every task stack in bytes, as required by AAPCS.
pub const STACK_ALIGN: usize = 8;

/// Smallest stack a task may be given, in bytes. Must hold the hardware
/// exception frame (32 bytes), the software-saved context (36 bytes, or
/// 100 bytes with the high FPU registers) and some headroom.
pub const MIN_STACK_SIZE: usize = 256;

/// Stack size of the kernel's idle task, in bytes.
pub const IDLE_STACK_SIZE: usize = 256;

/// Written to the lowest word of each task stack. If it changes, the task
/// has overflowed its stack.
pub const STACK_CANARY: u32 = 0xC0DE_5AFE;

/// Fill pattern for fresh stacks. Words that still hold it have never been
/// touched, which gives the stack high-water mark.
pub const STACK_PAINT: u32 = 0xA5A5_A5A5;
