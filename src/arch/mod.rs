//! # Architecture Abstraction Layer
//!
//! The hardware boundary of the kernel. Each port provides the same small
//! set of functions:
//!
//! | Function                  | Purpose                                      |
//! |---------------------------|----------------------------------------------|
//! | `request_context_switch`  | arm the context-switch exception             |
//! | `wait_for_switch`         | let a pended switch take effect              |
//! | `in_interrupt`            | is the caller an interrupt handler?          |
//! | `idle_entry`              | body of the kernel's idle task               |
//!
//! The Cortex-M port additionally exports the `PendSV` and `SysTick`
//! handlers and the start-up helpers used by `kernel::start`. Host builds
//! get a port with no hardware behind it, so the scheduler and the
//! primitives can be unit tested.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex_m;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::cortex_m::*;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use self::host::*;
