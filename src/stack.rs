//! # Task Stacks
//!
//! Statically allocated task stacks and the initial frame each task starts
//! from.
//!
//! ## Initial Frame (top = high address, growing down)
//!
//! ```text
//! [Hardware stacked frame]
//!   xPSR  (Thumb bit set)
//!   PC    (task entry point)
//!   LR    (task_returned trap)
//!   R12, R3, R2, R1, R0   (0)
//! [Software saved context]
//!   EXC_RETURN (thread mode, process stack, no FPU state)
//!   R11 .. R4  (0)             <- saved stack pointer after init
//!   ...
//!   free stack, painted with STACK_PAINT
//!   STACK_CANARY               <- lowest word
//! ```
//!
//! The first context switch into a task therefore behaves exactly like
//! returning from the exception that switched it out.

use core::cell::UnsafeCell;

use crate::config::{MIN_STACK_SIZE, STACK_ALIGN, STACK_CANARY, STACK_PAINT};
use crate::error::KernelError;
use crate::task::TaskEntry;

/// xPSR for a fresh task: only the Thumb bit is set.
pub const INITIAL_XPSR: u32 = 1 << 24;

/// EXC_RETURN: return to Thread mode, use PSP, basic (non-FPU) frame.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Words pushed by the hardware on exception entry.
pub const HW_FRAME_WORDS: usize = 8;

/// Words pushed by the trampoline: R4-R11 and EXC_RETURN.
pub const SW_FRAME_WORDS: usize = 9;

/// A task stack of `N` bytes.
///
/// `N` must be at least [`MIN_STACK_SIZE`] and a multiple of
/// [`STACK_ALIGN`]; both are checked when `Stack::<N>::new()` is
/// instantiated, so a bad size is a build error.
#[repr(C, align(8))]
pub struct Stack<const N: usize> {
    contents: UnsafeCell<[u8; N]>,
}

impl<const N: usize> Stack<N> {
    const VALID: () = {
        assert!(N >= MIN_STACK_SIZE, "task stack is smaller than MIN_STACK_SIZE");
        assert!(N % STACK_ALIGN == 0, "task stack size is not a multiple of STACK_ALIGN");
    };

    /// Create a new stack.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        Self {
            contents: UnsafeCell::new([0u8; N]),
        }
    }

    /// Size of the stack in bytes.
    pub const fn size(&self) -> usize {
        N
    }

    /// The memory region this stack covers.
    pub fn region(&'static self) -> StackRegion {
        StackRegion {
            base: self.contents.get() as *mut u32,
            size: N,
        }
    }
}

// SAFETY: the stack only hands out raw pointers to itself; the kernel is the
// only writer and it writes from inside critical sections or from the task
// that owns the stack.
unsafe impl<const N: usize> Sync for Stack<N> {}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Stack::new()
    }
}

/// A contiguous block of memory a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: *mut u32,
    size: usize,
}

impl StackRegion {
    /// The placeholder region of an unused TCB slot.
    pub const EMPTY: StackRegion = StackRegion {
        base: core::ptr::null_mut(),
        size: 0,
    };

    /// Describe a stack placed somewhere other than a [`Stack`], e.g. by the
    /// linker script. Size and alignment are checked at task creation.
    ///
    /// # Safety
    ///
    /// `base .. base + size` must be valid for reads and writes for the rest
    /// of the program and must not be used by anything but the task given
    /// this region.
    pub const unsafe fn from_raw_parts(base: *mut u32, size: usize) -> StackRegion {
        StackRegion { base, size }
    }

    /// Lowest address of the region.
    pub fn base(&self) -> *mut u32 {
        self.base
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address of the region.
    pub fn top(&self) -> *mut u32 {
        (self.base as *mut u8).wrapping_add(self.size) as *mut u32
    }

    /// Does `sp` point into this region (or at its top)?
    pub fn contains(&self, sp: *const u32) -> bool {
        let sp = sp as usize;
        sp >= self.base as usize && sp <= self.top() as usize
    }

    fn words(&self) -> usize {
        self.size / 4
    }

    /// Check the size and alignment rules for task stacks.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.size < MIN_STACK_SIZE {
            return Err(KernelError::StackTooSmall {
                size: self.size,
                min: MIN_STACK_SIZE,
            });
        }
        if self.size % STACK_ALIGN != 0 || self.base as usize % STACK_ALIGN != 0 {
            return Err(KernelError::StackMisaligned);
        }
        Ok(())
    }

    /// Paint the region, place the canary and push the initial frame for
    /// `entry`. Returns the task's first saved stack pointer.
    pub(crate) fn prepare(&self, entry: TaskEntry) -> *mut u32 {
        debug_assert!(self.validate().is_ok());
        for word in 0..self.words() {
            // SAFETY: `word` is inside the validated region.
            unsafe { self.base.add(word).write_volatile(STACK_PAINT) };
        }
        // SAFETY: the region holds at least MIN_STACK_SIZE bytes.
        unsafe { self.base.write_volatile(STACK_CANARY) };

        // SAFETY: MIN_STACK_SIZE leaves room for both frame partitions above
        // the canary.
        let mut pusher = unsafe { StackPusher::new(self.top()) };

        // Hardware frame. Bit 0 of the stacked PC must be clear; the Thumb
        // state comes from xPSR.
        pusher.push(INITIAL_XPSR);
        pusher.push(entry as usize as u32 & !1);
        pusher.push(task_returned as usize as u32);
        pusher.push(0); // R12
        pusher.push(0); // R3
        pusher.push(0); // R2
        pusher.push(0); // R1
        pusher.push(0); // R0

        // Software frame, popped by the trampoline
        pusher.push(EXC_RETURN_THREAD_PSP);
        for _ in 0..8 {
            pusher.push(0); // R11 down to R4
        }

        pusher.current()
    }

    /// Is the canary at the bottom of the region intact?
    pub fn canary_intact(&self) -> bool {
        if self.base.is_null() {
            return true;
        }
        // SAFETY: a non-null region was validated when its task was created.
        unsafe { self.base.read_volatile() == STACK_CANARY }
    }

    /// Bytes between the canary and the deepest point the stack has ever
    /// reached.
    pub fn unused_bytes(&self) -> usize {
        if self.base.is_null() {
            return 0;
        }
        let mut unused = 0;
        for word in 1..self.words() {
            // SAFETY: `word` is inside the validated region.
            if unsafe { self.base.add(word).read_volatile() } != STACK_PAINT {
                break;
            }
            unused += 4;
        }
        unused
    }
}

/// A helper for pushing words onto a full-descending Arm EABI stack.
struct StackPusher(*mut u32);

impl StackPusher {
    /// # Safety
    ///
    /// There must be enough writable space below `top` for every word that
    /// will be pushed.
    unsafe fn new(top: *mut u32) -> StackPusher {
        StackPusher(top)
    }

    fn push(&mut self, value: u32) {
        // SAFETY: guaranteed by the caller of `new`.
        unsafe {
            self.0 = self.0.sub(1);
            self.0.write_volatile(value);
        }
    }

    fn current(&self) -> *mut u32 {
        self.0
    }
}

/// Placed in the initial LR of every task. Task entry points never return,
/// so reaching this means the task's stack or code is corrupt.
extern "C" fn task_returned() -> ! {
    panic!("task entry function returned");
}
