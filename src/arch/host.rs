//! Host port: no interrupts and no real context switches. The scheduler
//! still makes every decision; nothing acts on them.

/// Nothing to arm on the host.
#[inline]
pub fn request_context_switch() {}

#[inline]
pub fn wait_for_switch() {}

/// Host code never runs in an interrupt handler.
#[cfg(not(test))]
#[inline]
pub fn in_interrupt() -> bool {
    false
}

#[cfg(test)]
std::thread_local! {
    static INTERRUPT_DEPTH: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
}

/// Whether the calling thread is inside [`as_interrupt`].
#[cfg(test)]
pub fn in_interrupt() -> bool {
    INTERRUPT_DEPTH.with(|depth| depth.get() > 0)
}

/// Run `f` as if from an interrupt handler, on this test thread only.
#[cfg(test)]
pub fn as_interrupt<R>(f: impl FnOnce() -> R) -> R {
    INTERRUPT_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = f();
    INTERRUPT_DEPTH.with(|depth| depth.set(depth.get() - 1));
    result
}

pub fn idle_entry() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_is_thread_context() {
        request_context_switch();
        wait_for_switch();
        assert!(!in_interrupt());
    }

    #[test]
    fn test_interrupt_context_nests() {
        as_interrupt(|| {
            assert!(in_interrupt());
            as_interrupt(|| assert!(in_interrupt()));
            assert!(in_interrupt());
        });
        assert!(!in_interrupt());
    }
}
