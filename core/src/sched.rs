//! Narrow interface to the external thread scheduler.
//!
//! The scheduler is not part of this workspace. The tick counter and the
//! soft-timer machinery consume it through a struct of function pointers
//! registered once at boot, the same way platform services are wired up
//! elsewhere in the kernel. Until registration, every wrapper degrades to a
//! harmless default (null thread, no-op reschedule), which keeps the timer
//! facility usable in early boot and in the test harness.

use core::ffi::c_void;
use core::ptr;

use spin::Once;

use ternos_abi::Tick;

/// The slice of thread state this kernel core reads and writes: the status
/// byte (state in the low bits, `YIELD` request above) and the round-robin
/// quantum. The scheduler owns the full thread control block; this header
/// must be its prefix.
#[repr(C)]
pub struct Thread {
    /// Thread state plus status bits (`ternos_abi::task`).
    pub stat: u8,
    /// Scheduling priority, 0 = highest.
    pub priority: u8,
    /// Ticks left in the current round-robin slice.
    pub remaining_tick: Tick,
    /// Slice length reloaded when `remaining_tick` hits zero.
    pub init_tick: Tick,
}

/// Entry point of a kernel thread.
pub type ThreadEntry = fn(*mut c_void);

/// Scheduler operations registered at boot.
#[derive(Clone, Copy)]
pub struct SchedOps {
    /// Currently running thread, or null outside thread context.
    pub thread_self: fn() -> *mut Thread,
    /// Take a thread off the run queue. Returns false if it was not queued.
    pub thread_suspend: fn(*mut Thread) -> bool,
    /// Put a suspended thread back on the run queue.
    pub thread_resume: fn(*mut Thread) -> bool,
    /// Block the calling thread for the given number of ticks.
    pub thread_delay: fn(Tick),
    /// Run the scheduler; may switch away from the caller.
    pub schedule: fn(),
    /// Spawn a kernel thread. Returns null on failure.
    pub kthread_spawn:
        fn(name: &str, entry: ThreadEntry, arg: *mut c_void, priority: u8, stack_size: usize) -> *mut Thread,
}

static SCHED_OPS: Once<SchedOps> = Once::new();

/// Register the scheduler. Later calls are ignored (first registration wins).
pub fn sched_register(ops: SchedOps) {
    SCHED_OPS.call_once(|| ops);
}

/// True once a scheduler has been registered.
pub fn sched_available() -> bool {
    SCHED_OPS.get().is_some()
}

#[inline]
pub fn thread_self() -> *mut Thread {
    match SCHED_OPS.get() {
        Some(ops) => (ops.thread_self)(),
        None => ptr::null_mut(),
    }
}

#[inline]
pub fn thread_suspend(thread: *mut Thread) -> bool {
    match SCHED_OPS.get() {
        Some(ops) => (ops.thread_suspend)(thread),
        None => false,
    }
}

#[inline]
pub fn thread_resume(thread: *mut Thread) -> bool {
    match SCHED_OPS.get() {
        Some(ops) => (ops.thread_resume)(thread),
        None => false,
    }
}

#[inline]
pub fn thread_delay(ticks: Tick) {
    if let Some(ops) = SCHED_OPS.get() {
        (ops.thread_delay)(ticks);
    }
}

#[inline]
pub fn schedule() {
    if let Some(ops) = SCHED_OPS.get() {
        (ops.schedule)();
    }
}

#[inline]
pub fn kthread_spawn(
    name: &str,
    entry: ThreadEntry,
    arg: *mut c_void,
    priority: u8,
    stack_size: usize,
) -> *mut Thread {
    match SCHED_OPS.get() {
        Some(ops) => (ops.kthread_spawn)(name, entry, arg, priority, stack_size),
        None => ptr::null_mut(),
    }
}
