//! Kernel tick type and wrap-safe comparison helpers.
//!
//! The tick counter is a monotonic `u32` that wraps modulo 2^32. All
//! chronological comparisons therefore use the half-range rule: `a` precedes
//! `b` iff `a.wrapping_sub(b)` lands in the lower half of the value range.
//! A timeout placed within `TICK_MAX / 2 - 1` ticks of "now" is unambiguous
//! across the wrap point.

/// The kernel's fundamental time unit. One clock interrupt advances it by one.
pub type Tick = u32;

/// Largest representable tick value; the counter wraps past it to zero.
pub const TICK_MAX: Tick = Tick::MAX;

/// Sentinel timeout meaning "block until explicitly woken".
pub const WAITING_FOREVER: Tick = TICK_MAX;

/// Upper bound (exclusive) for a valid timer interval.
///
/// Intervals at or above half the tick range cannot be ordered reliably
/// under wrap-around arithmetic.
pub const TICK_INTERVAL_MAX: Tick = TICK_MAX / 2;

/// Returns true if `deadline` has been reached at `now`, under half-range
/// ordering. Correct across counter wrap.
#[inline]
pub const fn tick_reached(now: Tick, deadline: Tick) -> bool {
    now.wrapping_sub(deadline) < TICK_MAX / 2
}

/// Returns true if tick `a` strictly precedes tick `b` under half-range
/// ordering.
#[inline]
pub const fn tick_before(a: Tick, b: Tick) -> bool {
    a != b && b.wrapping_sub(a) < TICK_MAX / 2
}
