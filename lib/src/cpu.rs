//! Interrupt-flag save/restore: the kernel's critical-section primitive.
//!
//! Every mutation of the tick counter, the timer skip lists, and heap
//! metadata happens between a [`save_flags_cli`] / [`restore_flags`] pair.
//! Pairs nest in strict LIFO order, and no function returns with a
//! different interrupt state than it was entered with — the timer check
//! loops rely on this when they drop and re-take the section around soft
//! callbacks.

use core::arch::asm;

/// Interrupt-enable bit in RFLAGS.
const RFLAGS_IF: u64 = 1 << 9;

/// Save RFLAGS and disable interrupts.
///
/// Returns the saved flags word; hand it back to the matching
/// [`restore_flags`] when the critical section ends.
#[inline(always)]
pub fn save_flags_cli() -> u64 {
    let flags: u64;
    unsafe {
        asm!(
            "pushfq",
            "pop {}",
            "cli",
            out(reg) flags,
            options(nomem)
        );
    }
    flags
}

/// Close a critical section opened by [`save_flags_cli`].
///
/// Executes STI only if IF was set in the saved word, so an inner pair
/// nested inside an outer one leaves interrupts off until the outermost
/// restore runs.
#[inline(always)]
pub fn restore_flags(flags: u64) {
    if flags & RFLAGS_IF != 0 {
        unsafe {
            asm!("sti", options(nomem, nostack));
        }
    }
}
