//! # TickOS
//!
//! A fixed-priority preemptive Real-Time Operating System (RTOS) kernel for
//! ARM Cortex-M microcontrollers.
//!
//! ## Overview
//!
//! TickOS runs a statically provisioned set of tasks on one core. At every
//! moment the highest-priority ready task runs; tasks of equal priority take
//! turns in FIFO order and only give up the CPU when they yield, sleep or
//! block. A periodic SysTick interrupt drives timeouts and delays.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   init() · create_task() · start() · delay() · yield   │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Scheduler               │  Sync Primitives (sync/)    │
//! │  scheduler.rs            │  Queue · Semaphores         │
//! │  ─ tick()                │  Mutex (prio inheritance)   │
//! │  ─ block / unblock       │  EventFlags                 │
//! │  ─ reschedule()          │                             │
//! ├──────────────────────────┴─────────────────────────────┤
//! │  Ready Queue (ready.rs) · Task Model (task.rs)          │
//! │  8 FIFO lists + bitmap · TCB · Priority · TaskState    │
//! ├────────────────────────────────────────────────────────┤
//! │  Stacks (stack.rs) · Time (time.rs) · Config           │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m.rs)                │
//! │    PendSV · SysTick · First-task launch                │
//! ├────────────────────────────────────────────────────────┤
//! │            ARM Cortex-M Hardware (Thumb)               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`
//! - **Per-task stack**: a `static Stack<N>` handed to `create_task`
//! - **Critical sections**: the `critical-section` crate guards the global
//!   scheduler and every primitive's state
//!
//! ## Host Testing
//!
//! Everything above the arch port is plain Rust over `&mut Scheduler`. On
//! the host the port is a stub, so `cargo test` drives the scheduler and
//! the primitives as a deterministic state machine.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod ready;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod task;
pub mod time;

pub use error::KernelError;
pub use scheduler::Scheduler;
pub use stack::Stack;
pub use sync::{BinarySemaphore, CountingSemaphore, EventFlags, Mutex, Queue, SyncError};
pub use task::{Priority, TaskId, TaskState};
pub use time::{Instant, Timeout, INFINITE};
