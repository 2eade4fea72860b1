//! Thread status bits and limits consumed by the timer facility.
//!
//! The scheduler itself lives outside this workspace; these constants define
//! the narrow slice of its thread state that the tick counter and the
//! soft-timer machinery read and write: the state field in the low bits of
//! `stat`, plus the `YIELD` request bit set when a time slice expires.

// --- Thread configuration ---

pub const THREAD_NAME_MAX: usize = crate::OBJ_NAME_MAX;
pub const INVALID_THREAD_ID: u32 = 0xFFFF_FFFF;

// --- Thread state (low bits of `stat`) ---

pub const THREAD_INIT: u8 = 0x00;
pub const THREAD_READY: u8 = 0x01;
pub const THREAD_SUSPEND: u8 = 0x02;
pub const THREAD_RUNNING: u8 = 0x03;
pub const THREAD_CLOSE: u8 = 0x04;

/// Mask selecting the state out of the `stat` byte.
pub const THREAD_STAT_MASK: u8 = 0x07;

/// Set by the tick ISR when the running thread's quantum expires; the
/// scheduler clears it on the next reschedule.
pub const THREAD_STAT_YIELD: u8 = 0x08;

/// Extract the scheduling state from a raw `stat` byte.
#[inline]
pub const fn thread_state(stat: u8) -> u8 {
    stat & THREAD_STAT_MASK
}

// --- Thread priority ---

pub const THREAD_PRIORITY_HIGHEST: u8 = 0;
pub const THREAD_PRIORITY_NORMAL: u8 = 16;
pub const THREAD_PRIORITY_IDLE: u8 = 31;
