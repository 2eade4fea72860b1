//! Kernel tick counter.
//!
//! A single monotonic `u32` advanced once per clock interrupt. It drives
//! the round-robin time slice of the running thread and the hard-timer
//! expiry check; all consumers compare ticks with the half-range helpers
//! from `ternos_abi::tick`, so the counter is free to wrap.
//!
//! SMP note: a per-CPU counter is a configuration axis of the design, but
//! this build keeps the single global counter and global timer lists.

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use ternos_abi::{THREAD_STAT_YIELD, Tick, WAITING_FOREVER};
use ternos_lib::cpu;

use crate::sched;
use crate::timer;

/// Clock interrupts per second. Must divide 1000 evenly so millisecond
/// conversions stay exact.
pub const TICKS_PER_SEC: Tick = 100;

const _: () = assert!(1000 % TICKS_PER_SEC == 0);

static TICK: AtomicU32 = AtomicU32::new(0);

/// Returns the current tick count since boot.
#[inline]
pub fn tick_get() -> Tick {
    TICK.load(Ordering::Relaxed)
}

/// Overwrite the tick counter.
pub fn tick_set(tick: Tick) {
    let flags = cpu::save_flags_cli();
    TICK.store(tick, Ordering::Relaxed);
    cpu::restore_flags(flags);
}

/// Notify the kernel that one tick has passed.
///
/// Called from the periodic clock ISR. Advances the counter, charges the
/// running thread's quantum (reloading it and requesting a yield when it
/// runs out), then checks the hard-timer list. The counter is advanced
/// before the hard-timer check, so `tick_get()` inside an expiring callback
/// never reads a value older than the expiry tick.
pub fn tick_increase() {
    call_tick_hook();

    let flags = cpu::save_flags_cli();

    TICK.fetch_add(1, Ordering::Relaxed);

    let thread = sched::thread_self();
    let mut need_schedule = false;
    if !thread.is_null() {
        // SAFETY: the scheduler hands out valid thread pointers and this
        // runs with interrupts disabled, so the thread cannot exit under us.
        unsafe {
            let t = &mut *thread;
            t.remaining_tick = t.remaining_tick.wrapping_sub(1);
            if t.remaining_tick == 0 {
                t.remaining_tick = t.init_tick;
                t.stat |= THREAD_STAT_YIELD;
                need_schedule = true;
            }
        }
    }

    cpu::restore_flags(flags);

    if need_schedule {
        sched::schedule();
    }

    timer::timer_check();
}

/// Convert milliseconds to ticks.
///
/// Negative values map to [`WAITING_FOREVER`]; otherwise the sub-second
/// remainder rounds up, so any nonzero duration waits at least one tick.
pub fn tick_from_ms(ms: i32) -> Tick {
    if ms < 0 {
        return WAITING_FOREVER;
    }
    let ms = ms as Tick;
    let mut tick = TICKS_PER_SEC * (ms / 1000);
    tick += (TICKS_PER_SEC * (ms % 1000) + 999) / 1000;
    tick
}

/// Milliseconds elapsed since boot, derived from the tick counter.
/// Wraps together with the counter.
pub fn tick_to_ms() -> u32 {
    tick_get().wrapping_mul(1000 / TICKS_PER_SEC)
}

// ---------------------------------------------------------------------------
// Tick hook
// ---------------------------------------------------------------------------

/// Instrumentation hook invoked at the top of every [`tick_increase`].
pub type TickHook = fn();

static TICK_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Install the tick hook. Runs in ISR context; must not block.
pub fn tick_sethook(hook: TickHook) {
    TICK_HOOK.store(hook as *mut (), Ordering::Release);
}

#[inline]
fn call_tick_hook() {
    let raw = TICK_HOOK.load(Ordering::Acquire);
    if !raw.is_null() {
        // SAFETY: only valid `TickHook` fn pointers are stored above.
        let hook: TickHook = unsafe { core::mem::transmute(raw) };
        hook();
    }
}
