//! # Time Source
//!
//! The kernel keeps a free-running 32-bit tick counter that wraps at
//! `u32::MAX`. Every comparison against it goes through wrapping
//! arithmetic, so a deadline computed just before the counter rolls over
//! still expires on time.
//!
//! Blocking calls take a [`Timeout`]; at the moment of the call it is
//! resolved against the current tick into a [`Deadline`], and every later
//! retry measures against that same deadline.

use core::fmt;

use crate::config::TICK_HZ;

/// A point on the kernel's tick timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instant(u32);

impl Instant {
    /// The value of the tick counter at reset.
    pub const ZERO: Instant = Instant(0);

    /// Wrap a raw tick count.
    pub const fn from_ticks(ticks: u32) -> Self {
        Instant(ticks)
    }

    /// The raw tick count.
    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// The instant `ticks` after this one.
    pub const fn add_ticks(self, ticks: u32) -> Instant {
        Instant(self.0.wrapping_add(ticks))
    }

    /// Ticks from `earlier` to `self`.
    pub const fn ticks_since(self, earlier: Instant) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Has `self` reached or passed `deadline`?
    ///
    /// Only meaningful while the two are less than 2^31 ticks apart,
    /// which [`MAX_TIMEOUT_TICKS`] guarantees for kernel deadlines.
    pub const fn has_reached(self, deadline: Instant) -> bool {
        (self.0.wrapping_sub(deadline.0) as i32) >= 0
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Longest finite timeout, in ticks. Anything longer is clamped.
pub const MAX_TIMEOUT_TICKS: u32 = i32::MAX as u32;

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not wait at all.
    NoWait,
    /// Wait at most this many ticks.
    Ticks(u32),
    /// Wait until the operation completes.
    Infinite,
}

/// Wait until the operation completes.
pub const INFINITE: Timeout = Timeout::Infinite;

impl Timeout {
    /// A timeout of `ticks` ticks. Zero means [`Timeout::NoWait`].
    pub const fn ticks(ticks: u32) -> Timeout {
        if ticks == 0 {
            Timeout::NoWait
        } else if ticks > MAX_TIMEOUT_TICKS {
            Timeout::Ticks(MAX_TIMEOUT_TICKS)
        } else {
            Timeout::Ticks(ticks)
        }
    }

    /// A timeout of at least `ms` milliseconds.
    pub const fn millis(ms: u32) -> Timeout {
        Timeout::ticks(ms_to_ticks(ms))
    }

    /// Is this the non-blocking special case?
    pub const fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait)
    }
}

impl From<u32> for Timeout {
    /// `0` is [`Timeout::NoWait`], `u32::MAX` is [`Timeout::Infinite`].
    fn from(ticks: u32) -> Self {
        if ticks == u32::MAX {
            Timeout::Infinite
        } else {
            Timeout::ticks(ticks)
        }
    }
}

/// A [`Timeout`] resolved against the tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// The caller must not block.
    NoWait,
    /// Give up once the tick counter reaches this instant.
    At(Instant),
    /// Never give up.
    Never,
}

impl Deadline {
    /// Resolve `timeout` against `now`. Finite timeouts longer than
    /// [`MAX_TIMEOUT_TICKS`] are clamped to it.
    pub const fn new(now: Instant, timeout: Timeout) -> Deadline {
        match timeout {
            Timeout::NoWait => Deadline::NoWait,
            Timeout::Ticks(ticks) if ticks > MAX_TIMEOUT_TICKS => {
                Deadline::At(now.add_ticks(MAX_TIMEOUT_TICKS))
            }
            Timeout::Ticks(ticks) => Deadline::At(now.add_ticks(ticks)),
            Timeout::Infinite => Deadline::Never,
        }
    }

    /// May a caller holding this deadline be blocked?
    pub const fn can_block(self) -> bool {
        !matches!(self, Deadline::NoWait)
    }

    /// Has the deadline passed at `now`? A `NoWait` deadline is always
    /// expired.
    pub const fn has_expired(self, now: Instant) -> bool {
        match self {
            Deadline::NoWait => true,
            Deadline::At(at) => now.has_reached(at),
            Deadline::Never => false,
        }
    }

    /// The tick at which a task blocked with this deadline must be woken.
    pub const fn wake_time(self) -> Option<Instant> {
        match self {
            Deadline::At(at) => Some(at),
            _ => None,
        }
    }
}

/// Convert milliseconds to ticks, rounding up so a non-zero duration never
/// becomes zero ticks.
pub const fn ms_to_ticks(ms: u32) -> u32 {
    let ticks = (ms as u64 * TICK_HZ as u64).div_ceil(1000);
    if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as u32
    }
}

/// Convert ticks to whole milliseconds.
pub const fn ticks_to_ms(ticks: u32) -> u32 {
    (ticks as u64 * 1000 / TICK_HZ as u64) as u32
}
