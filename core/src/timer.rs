//! Tick-driven timer facility with a skip-list timer wheel.
//!
//! Timers live on one of two scope lists ordered by absolute expiry tick:
//! the **hard** list, checked from [`tick_increase`](crate::clock::tick_increase)
//! in ISR context, and the **soft** list, checked by a dedicated kernel
//! thread. A hard timer's callback runs with interrupts disabled and must
//! not block; a soft timer's callback runs in the timer thread with
//! interrupts enabled and may block (delaying other soft timers).
//!
//! # Skip list
//!
//! Each scope keeps [`SKIP_LIST_LEVEL`] circular doubly-linked lists over
//! the same timers. Level `SKIP_LIST_LEVEL - 1` holds every active timer
//! and is the canonical traversal level; the levels above it are express
//! lanes that accelerate the insert search. A timer's presence in the
//! express lanes is decided at insert time from a monotonically increasing
//! counter masked with [`SKIP_LIST_MASK`], which distributes list heights
//! geometrically without a random source. Equal expiry ticks insert after
//! existing entries, so same-expiry timers fire in start order.
//!
//! # Concurrency
//!
//! All list mutation happens between `save_flags_cli`/`restore_flags`
//! pairs. The check loops move each expired timer onto a stack-local list
//! before invoking its callback; if the callback detaches, deletes, or
//! restarts the timer, the local list ends up empty and the loop skips the
//! periodic reinsert. Periodic timers restart from the tick observed after
//! the callback returns, so their period drifts by callback duration — by
//! design, matching the soft path where the callback runs unlocked.

use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::fmt;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU32, Ordering};

use bitflags::bitflags;

use ternos_abi::{
    OBJ_NAME_MAX, THREAD_SUSPEND, TICK_INTERVAL_MAX, TICK_MAX, Tick, thread_state, tick_before,
    tick_reached,
};
use ternos_lib::object::{
    ObjectClass, object_call_put_hook, object_call_take_hook, object_detach, object_register,
};
use ternos_lib::string::{bytes_as_str, copy_name};
use ternos_lib::{cpu, klog_error, klog_info, klog_trace, klog_warn};
use ternos_mm::{kfree, kmalloc};

use crate::clock::tick_get;
use crate::sched::{self, Thread};

/// Number of skip-list levels per timer scope.
pub const SKIP_LIST_LEVEL: usize = 4;

/// Mask drawn against the insert counter per express level; a zero group
/// promotes the timer one level further.
pub const SKIP_LIST_MASK: u32 = 0x3;

/// Priority of the soft-timer thread (0 = highest).
pub const TIMER_THREAD_PRIO: u8 = 0;

/// Stack size of the soft-timer thread.
pub const TIMER_THREAD_STACK_SIZE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// `timer_stop` on a timer that is not running.
    NotActive,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive => write!(f, "timer is not active"),
        }
    }
}

pub type TimerResult<T = ()> = Result<T, TimerError>;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Timer mode and state bits. One-shot and hard dispatch are the
    /// defaults (empty flags).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TimerFlags: u8 {
        /// Set while the timer is linked into a scope list.
        const ACTIVATED = 0x1;
        /// Restart automatically after each expiry.
        const PERIODIC = 0x2;
        /// Dispatch from the soft-timer thread instead of the tick ISR.
        const SOFT_TIMER = 0x4;
    }
}

// ---------------------------------------------------------------------------
// Intrusive circular list
// ---------------------------------------------------------------------------

/// Node of a circular doubly-linked list. An unlinked node points at
/// itself, so removal is idempotent.
#[repr(C)]
pub struct ListNode {
    next: *mut ListNode,
    prev: *mut ListNode,
}

impl ListNode {
    const fn new() -> Self {
        Self {
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }
    }

    #[inline]
    unsafe fn init(node: *mut ListNode) {
        (*node).next = node;
        (*node).prev = node;
    }

    #[inline]
    unsafe fn is_empty(node: *const ListNode) -> bool {
        (*node).next as *const ListNode == node
    }

    #[inline]
    unsafe fn insert_after(node: *mut ListNode, new: *mut ListNode) {
        (*(*node).next).prev = new;
        (*new).next = (*node).next;
        (*new).prev = node;
        (*node).next = new;
    }

    #[inline]
    unsafe fn remove(node: *mut ListNode) {
        debug_assert!(!(*node).next.is_null());
        (*(*node).next).prev = (*node).prev;
        (*(*node).prev).next = (*node).next;
        Self::init(node);
    }
}

// ---------------------------------------------------------------------------
// Timer object
// ---------------------------------------------------------------------------

/// Expiry callback. Hard timers: ISR context, interrupts disabled, must not
/// block. Soft timers: timer-thread context, interrupts enabled.
pub type TimerCallback = fn(*mut c_void);

/// Timer control block. Static instances are set up with [`timer_init`];
/// heap-backed instances come from [`timer_create`].
#[repr(C)]
pub struct Timer {
    name: [u8; OBJ_NAME_MAX],
    flags: TimerFlags,
    /// One intrusive node per skip-list level. The timer is always linked
    /// at the last level while active; express-level membership is decided
    /// at insert time.
    row: [ListNode; SKIP_LIST_LEVEL],
    timeout_func: TimerCallback,
    parameter: *mut c_void,
    /// Reload interval in ticks.
    init_tick: Tick,
    /// Absolute expiry tick while active.
    timeout_tick: Tick,
}

impl Timer {
    pub fn name(&self) -> &str {
        bytes_as_str(&self.name)
    }

    pub fn flags(&self) -> TimerFlags {
        self.flags
    }

    pub fn init_tick(&self) -> Tick {
        self.init_tick
    }

    pub fn timeout_tick(&self) -> Tick {
        self.timeout_tick
    }
}

/// Recover the owning timer from one of its row nodes.
#[inline]
unsafe fn timer_from_node(node: *mut ListNode, level: usize) -> *mut Timer {
    (node as usize - mem::offset_of!(Timer, row) - level * mem::size_of::<ListNode>()) as *mut Timer
}

// ---------------------------------------------------------------------------
// Scope lists
// ---------------------------------------------------------------------------

/// Sentinel heads of one timer scope (hard or soft).
struct TimerScope {
    heads: UnsafeCell<[ListNode; SKIP_LIST_LEVEL]>,
    ready: AtomicBool,
}

// SAFETY: the head array is only touched inside interrupt-disabled critical
// sections.
unsafe impl Sync for TimerScope {}

impl TimerScope {
    const fn new() -> Self {
        Self {
            heads: UnsafeCell::new([const { ListNode::new() }; SKIP_LIST_LEVEL]),
            ready: AtomicBool::new(false),
        }
    }

    #[inline]
    fn heads(&self) -> *mut ListNode {
        self.heads.get() as *mut ListNode
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Self-link all sentinel heads and mark the scope usable.
    fn init(&self) {
        let flags = cpu::save_flags_cli();
        unsafe {
            for lvl in 0..SKIP_LIST_LEVEL {
                ListNode::init(self.heads().add(lvl));
            }
        }
        self.ready.store(true, Ordering::Release);
        cpu::restore_flags(flags);
    }
}

static HARD_TIMER_SCOPE: TimerScope = TimerScope::new();
static SOFT_TIMER_SCOPE: TimerScope = TimerScope::new();

/// Insert counter feeding the express-level selection. A plain counter
/// masked per level spreads list heights more evenly than hashing the
/// timeout tick, which is attacker-influenced and clustered.
static TIMER_INSERT_COUNT: AtomicU32 = AtomicU32::new(0);

const SOFT_TIMER_IDLE: u8 = 1;
const SOFT_TIMER_BUSY: u8 = 0;

/// Whether the soft-timer thread is currently inside a callback.
static SOFT_TIMER_STATUS: AtomicU8 = AtomicU8::new(SOFT_TIMER_IDLE);

/// Handle of the soft-timer thread once spawned.
static TIMER_THREAD: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

#[inline]
fn scope_for(flags: TimerFlags) -> &'static TimerScope {
    if flags.contains(TimerFlags::SOFT_TIMER) {
        &SOFT_TIMER_SCOPE
    } else {
        &HARD_TIMER_SCOPE
    }
}

// ---------------------------------------------------------------------------
// Expiry hooks
// ---------------------------------------------------------------------------

/// Instrumentation hook invoked around expiry callbacks.
pub type TimerHook = fn(*mut Timer);

static ENTER_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
static EXIT_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Install a hook invoked just before each expiry callback.
pub fn timer_enter_sethook(hook: TimerHook) {
    ENTER_HOOK.store(hook as *mut (), Ordering::Release);
}

/// Install a hook invoked right after each expiry callback returns.
pub fn timer_exit_sethook(hook: TimerHook) {
    EXIT_HOOK.store(hook as *mut (), Ordering::Release);
}

#[inline]
fn call_timer_hook(slot: &AtomicPtr<()>, timer: *mut Timer) {
    let raw = slot.load(Ordering::Acquire);
    if !raw.is_null() {
        // SAFETY: only valid `TimerHook` fn pointers are stored above.
        let hook: TimerHook = unsafe { core::mem::transmute(raw) };
        hook(timer);
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Unlink a timer from every level it occupies. Unlinked rows are
/// self-referencing, so this is a no-op for inactive timers.
unsafe fn timer_remove(timer: *mut Timer) {
    for lvl in 0..SKIP_LIST_LEVEL {
        ListNode::remove(&mut (*timer).row[lvl]);
    }
}

/// Fill in a timer control block and self-link its rows.
unsafe fn timer_setup(
    timer: *mut Timer,
    name: &str,
    timeout: TimerCallback,
    parameter: *mut c_void,
    time: Tick,
    flags: TimerFlags,
) {
    ptr::write(
        timer,
        Timer {
            name: copy_name::<OBJ_NAME_MAX>(name),
            flags: flags.difference(TimerFlags::ACTIVATED),
            row: [const { ListNode::new() }; SKIP_LIST_LEVEL],
            timeout_func: timeout,
            parameter,
            init_tick: time,
            timeout_tick: 0,
        },
    );
    for lvl in 0..SKIP_LIST_LEVEL {
        ListNode::init(&mut (*timer).row[lvl]);
    }
}

/// Expiry tick of the earliest timer in a scope, if any.
fn scope_next_timeout(scope: &TimerScope) -> Option<Tick> {
    if !scope.is_ready() {
        return None;
    }

    let flags = cpu::save_flags_cli();
    let result = unsafe {
        let head = scope.heads().add(SKIP_LIST_LEVEL - 1);
        if ListNode::is_empty(head) {
            None
        } else {
            let t = timer_from_node((*head).next, SKIP_LIST_LEVEL - 1);
            Some((*t).timeout_tick)
        }
    };
    cpu::restore_flags(flags);

    result
}

// ---------------------------------------------------------------------------
// Init / create / detach / delete
// ---------------------------------------------------------------------------

/// Initialize a statically allocated timer.
///
/// The timer starts deactivated; call [`timer_start`] to arm it. It is
/// registered as a kernel object under `name`.
///
/// # Safety
///
/// `timer` must point to writable storage for a `Timer` that stays at this
/// address until [`timer_detach`] — the row nodes link it into the scope
/// lists by address.
pub unsafe fn timer_init(
    timer: *mut Timer,
    name: &str,
    timeout: TimerCallback,
    parameter: *mut c_void,
    time: Tick,
    flags: TimerFlags,
) {
    debug_assert!(!timer.is_null());
    debug_assert!(time < TICK_INTERVAL_MAX);

    timer_setup(timer, name, timeout, parameter, time, flags);

    if let Err(e) = object_register(ObjectClass::Timer, name, timer as *mut c_void) {
        klog_info!("timer_init: object registry rejected '{}': {:?}", name, e);
    }
}

/// Allocate and initialize a timer on the system heap.
///
/// Returns null when the heap cannot satisfy the allocation.
pub fn timer_create(
    name: &str,
    timeout: TimerCallback,
    parameter: *mut c_void,
    time: Tick,
    flags: TimerFlags,
) -> *mut Timer {
    debug_assert!(time < TICK_INTERVAL_MAX);

    let timer = kmalloc(mem::size_of::<Timer>()) as *mut Timer;
    if timer.is_null() {
        klog_error!("timer_create: no memory for timer '{}'", name);
        return ptr::null_mut();
    }

    unsafe {
        timer_setup(timer, name, timeout, parameter, time, flags);
    }
    if let Err(e) = object_register(ObjectClass::Timer, name, timer as *mut c_void) {
        klog_info!("timer_create: object registry rejected '{}': {:?}", name, e);
    }

    timer
}

/// Stop a static timer and remove it from the object registry.
///
/// The storage is untouched and may be reused with [`timer_init`].
pub fn timer_detach(timer: *mut Timer) -> TimerResult {
    debug_assert!(!timer.is_null());

    let flags = cpu::save_flags_cli();
    unsafe {
        timer_remove(timer);
        (*timer).flags.remove(TimerFlags::ACTIVATED);
    }
    cpu::restore_flags(flags);

    let _ = object_detach(timer as *mut c_void);
    Ok(())
}

/// Stop a heap-backed timer, deregister it, and free its control block.
pub fn timer_delete(timer: *mut Timer) -> TimerResult {
    debug_assert!(!timer.is_null());

    let flags = cpu::save_flags_cli();
    unsafe {
        timer_remove(timer);
        (*timer).flags.remove(TimerFlags::ACTIVATED);
    }
    cpu::restore_flags(flags);

    let _ = object_detach(timer as *mut c_void);
    kfree(timer as *mut c_void);
    Ok(())
}

// ---------------------------------------------------------------------------
// Start / stop / control
// ---------------------------------------------------------------------------

/// Arm a timer: compute its absolute expiry from the current tick and
/// splice it into its scope's skip list.
///
/// Restarting an already-armed timer is allowed; it is unlinked first and
/// re-queued with a fresh expiry. Starting a soft timer resumes the
/// soft-timer thread if it is parked.
pub fn timer_start(timer: *mut Timer) -> TimerResult {
    debug_assert!(!timer.is_null());

    let mut need_schedule = false;

    let irq = cpu::save_flags_cli();
    unsafe {
        // Re-queue from scratch: unlink and deactivate first.
        timer_remove(timer);
        (*timer).flags.remove(TimerFlags::ACTIVATED);

        object_call_take_hook(ObjectClass::Timer, timer as *mut c_void);

        (*timer).timeout_tick = tick_get().wrapping_add((*timer).init_tick);

        let scope = scope_for((*timer).flags);
        debug_assert!(scope.is_ready());
        let heads = scope.heads();

        // Walk every level, sparsest first, advancing while the successor
        // expires no later than we do. Equal expiries are passed over so
        // same-tick timers fire in start order. The splice point found at
        // one level seeds the next level's walk: either the next head
        // sentinel, or the same owner's row node one level down.
        let mut row_head: [*mut ListNode; SKIP_LIST_LEVEL] = [ptr::null_mut(); SKIP_LIST_LEVEL];
        row_head[0] = heads;
        for lvl in 0..SKIP_LIST_LEVEL {
            let head = heads.add(lvl);
            while row_head[lvl] != (*head).prev {
                let p = (*row_head[lvl]).next;
                let t = timer_from_node(p, lvl);

                let delta = (*t).timeout_tick.wrapping_sub((*timer).timeout_tick);
                if delta == 0 {
                    row_head[lvl] = p;
                } else if delta < TICK_MAX / 2 {
                    // Successor expires after us: splice here.
                    break;
                } else {
                    row_head[lvl] = p;
                }
            }
            if lvl != SKIP_LIST_LEVEL - 1 {
                row_head[lvl + 1] = if row_head[lvl] == head {
                    heads.add(lvl + 1)
                } else {
                    // The predecessor's node for the next level sits right
                    // behind its node for this one.
                    row_head[lvl].add(1)
                };
            }
        }

        let mut tst_nr = TIMER_INSERT_COUNT.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        // Always link at the canonical level; promote into express levels
        // while the counter keeps producing zero mask groups.
        ListNode::insert_after(
            row_head[SKIP_LIST_LEVEL - 1],
            &mut (*timer).row[SKIP_LIST_LEVEL - 1],
        );
        for n in 2..=SKIP_LIST_LEVEL {
            if tst_nr & SKIP_LIST_MASK != 0 {
                break;
            }
            ListNode::insert_after(
                row_head[SKIP_LIST_LEVEL - n],
                &mut (*timer).row[SKIP_LIST_LEVEL - n],
            );
            tst_nr >>= (SKIP_LIST_MASK + 1) >> 1;
        }

        (*timer).flags.insert(TimerFlags::ACTIVATED);

        if (*timer).flags.contains(TimerFlags::SOFT_TIMER) {
            let thread = TIMER_THREAD.load(Ordering::Relaxed);
            if SOFT_TIMER_STATUS.load(Ordering::Relaxed) == SOFT_TIMER_IDLE
                && !thread.is_null()
                && thread_state((*thread).stat) == THREAD_SUSPEND
            {
                sched::thread_resume(thread);
                need_schedule = true;
            }
        }
    }
    cpu::restore_flags(irq);

    if need_schedule {
        sched::schedule();
    }

    Ok(())
}

/// Disarm a running timer.
///
/// Returns [`TimerError::NotActive`] if the timer is not armed.
pub fn timer_stop(timer: *mut Timer) -> TimerResult {
    debug_assert!(!timer.is_null());

    unsafe {
        if !(*timer).flags.contains(TimerFlags::ACTIVATED) {
            return Err(TimerError::NotActive);
        }

        object_call_put_hook(ObjectClass::Timer, timer as *mut c_void);

        let irq = cpu::save_flags_cli();
        timer_remove(timer);
        (*timer).flags.remove(TimerFlags::ACTIVATED);
        cpu::restore_flags(irq);
    }

    Ok(())
}

/// Get or set timer options. Each command is independent; mutating the
/// interval takes effect on the next [`timer_start`].
pub enum TimerControl<'a> {
    /// Read the reload interval.
    GetTime(&'a mut Tick),
    /// Replace the reload interval. Must be below half the tick range.
    SetTime(Tick),
    /// Clear the periodic bit: fire once, then deactivate.
    SetOneshot,
    /// Set the periodic bit: restart after every expiry.
    SetPeriodic,
    /// True if the timer is currently armed.
    GetState(&'a mut bool),
    /// Read the absolute expiry tick of the current arming.
    GetRemainTime(&'a mut Tick),
}

pub fn timer_control(timer: *mut Timer, cmd: TimerControl<'_>) -> TimerResult {
    debug_assert!(!timer.is_null());

    let irq = cpu::save_flags_cli();
    unsafe {
        match cmd {
            TimerControl::GetTime(out) => *out = (*timer).init_tick,
            TimerControl::SetTime(time) => {
                debug_assert!(time < TICK_INTERVAL_MAX);
                (*timer).init_tick = time;
            }
            TimerControl::SetOneshot => {
                (*timer).flags.remove(TimerFlags::PERIODIC);
            }
            TimerControl::SetPeriodic => {
                (*timer).flags.insert(TimerFlags::PERIODIC);
            }
            TimerControl::GetState(out) => {
                *out = (*timer).flags.contains(TimerFlags::ACTIVATED);
            }
            TimerControl::GetRemainTime(out) => *out = (*timer).timeout_tick,
        }
    }
    cpu::restore_flags(irq);

    Ok(())
}

// ---------------------------------------------------------------------------
// Expiry checks
// ---------------------------------------------------------------------------

/// Check the hard-timer list and dispatch every expired callback.
///
/// Invoked from the tick ISR with each clock interrupt. Callbacks run with
/// interrupts still disabled; the current tick is re-read after each one so
/// a long callback cannot starve timers queued behind it.
pub fn timer_check() {
    if !HARD_TIMER_SCOPE.is_ready() {
        return;
    }

    klog_trace!("timer check enter");

    let mut current_tick = tick_get();

    let irq = cpu::save_flags_cli();
    unsafe {
        let head = HARD_TIMER_SCOPE.heads().add(SKIP_LIST_LEVEL - 1);

        // Expired timers are parked on this stack-local list, hooked at
        // the canonical level only, while their callback runs. An empty
        // list afterwards means the callback took the timer away.
        let mut expired = ListNode::new();
        let list: *mut ListNode = &mut expired;
        ListNode::init(list);

        while !ListNode::is_empty(head) {
            let t = timer_from_node((*head).next, SKIP_LIST_LEVEL - 1);

            if !tick_reached(current_tick, (*t).timeout_tick) {
                break;
            }

            call_timer_hook(&ENTER_HOOK, t);

            timer_remove(t);
            if !(*t).flags.contains(TimerFlags::PERIODIC) {
                (*t).flags.remove(TimerFlags::ACTIVATED);
            }
            ListNode::insert_after(list, &mut (*t).row[SKIP_LIST_LEVEL - 1]);

            ((*t).timeout_func)((*t).parameter);

            current_tick = tick_get();

            call_timer_hook(&EXIT_HOOK, t);
            klog_trace!("current tick: {}", current_tick);

            if ListNode::is_empty(list) {
                // Callback detached, deleted, or restarted the timer.
                continue;
            }
            ListNode::remove(&mut (*t).row[SKIP_LIST_LEVEL - 1]);
            if (*t).flags.contains(TimerFlags::PERIODIC)
                && (*t).flags.contains(TimerFlags::ACTIVATED)
            {
                (*t).flags.remove(TimerFlags::ACTIVATED);
                let _ = timer_start(t);
            }
        }
    }
    cpu::restore_flags(irq);

    klog_trace!("timer check leave");
}

/// Check the soft-timer list and dispatch every expired callback.
///
/// Runs in the soft-timer thread. Interrupts are re-enabled around each
/// callback, and the status flag marks the thread busy so a concurrent
/// [`timer_start`] does not try to resume it mid-callback.
pub fn soft_timer_check() {
    if !SOFT_TIMER_SCOPE.is_ready() {
        return;
    }

    klog_trace!("software timer check enter");

    let mut irq = cpu::save_flags_cli();
    unsafe {
        let head = SOFT_TIMER_SCOPE.heads().add(SKIP_LIST_LEVEL - 1);

        let mut expired = ListNode::new();
        let list: *mut ListNode = &mut expired;
        ListNode::init(list);

        while !ListNode::is_empty(head) {
            let t = timer_from_node((*head).next, SKIP_LIST_LEVEL - 1);

            // Re-read every iteration: the tick advances while callbacks
            // run with interrupts enabled.
            let current_tick = tick_get();

            if !tick_reached(current_tick, (*t).timeout_tick) {
                break;
            }

            call_timer_hook(&ENTER_HOOK, t);

            timer_remove(t);
            if !(*t).flags.contains(TimerFlags::PERIODIC) {
                (*t).flags.remove(TimerFlags::ACTIVATED);
            }
            ListNode::insert_after(list, &mut (*t).row[SKIP_LIST_LEVEL - 1]);

            SOFT_TIMER_STATUS.store(SOFT_TIMER_BUSY, Ordering::Relaxed);
            cpu::restore_flags(irq);

            ((*t).timeout_func)((*t).parameter);

            call_timer_hook(&EXIT_HOOK, t);
            klog_trace!("current tick: {}", tick_get());

            irq = cpu::save_flags_cli();
            SOFT_TIMER_STATUS.store(SOFT_TIMER_IDLE, Ordering::Relaxed);

            if ListNode::is_empty(list) {
                // Callback detached, deleted, or restarted the timer.
                continue;
            }
            ListNode::remove(&mut (*t).row[SKIP_LIST_LEVEL - 1]);
            if (*t).flags.contains(TimerFlags::PERIODIC)
                && (*t).flags.contains(TimerFlags::ACTIVATED)
            {
                (*t).flags.remove(TimerFlags::ACTIVATED);
                let _ = timer_start(t);
            }
        }
    }
    cpu::restore_flags(irq);

    klog_trace!("software timer check leave");
}

/// Expiry tick of the earliest hard timer, or [`TICK_MAX`] when the list
/// is empty. Tickless idle code uses this to size its sleep.
pub fn timer_next_timeout_tick() -> Tick {
    scope_next_timeout(&HARD_TIMER_SCOPE).unwrap_or(TICK_MAX)
}

// ---------------------------------------------------------------------------
// Soft-timer thread
// ---------------------------------------------------------------------------

fn timer_thread_entry(_parameter: *mut c_void) {
    loop {
        match scope_next_timeout(&SOFT_TIMER_SCOPE) {
            None => {
                // No soft timer queued: park until timer_start resumes us.
                let me = sched::thread_self();
                sched::thread_suspend(me);
                sched::schedule();
            }
            Some(next_timeout) => {
                let current_tick = tick_get();
                let delta = next_timeout.wrapping_sub(current_tick);
                if delta < TICK_MAX / 2 {
                    sched::thread_delay(delta);
                }
            }
        }

        soft_timer_check();
    }
}

// ---------------------------------------------------------------------------
// System init
// ---------------------------------------------------------------------------

/// Initialize the hard-timer list. Call once at boot, before the first
/// clock interrupt.
pub fn system_timer_init() {
    HARD_TIMER_SCOPE.init();
}

/// Initialize the soft-timer list and spawn the soft-timer thread.
///
/// Requires a registered scheduler; without one the soft list still works
/// through manual [`soft_timer_check`] calls, but nothing drives it.
pub fn system_timer_thread_init() {
    SOFT_TIMER_SCOPE.init();

    if !sched::sched_available() {
        klog_warn!("timer: no scheduler registered, soft-timer thread not started");
        return;
    }

    let thread = sched::kthread_spawn(
        "timer",
        timer_thread_entry,
        ptr::null_mut(),
        TIMER_THREAD_PRIO,
        TIMER_THREAD_STACK_SIZE,
    );
    if thread.is_null() {
        klog_error!("timer: failed to spawn the soft-timer thread");
        return;
    }
    TIMER_THREAD.store(thread, Ordering::Release);
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Walk both scopes and verify linkage and expiry ordering at every level.
///
/// Used by the test suites; logs the first inconsistency found.
pub fn timer_lists_consistent() -> bool {
    scope_consistent(&HARD_TIMER_SCOPE, "hard") && scope_consistent(&SOFT_TIMER_SCOPE, "soft")
}

fn scope_consistent(scope: &TimerScope, what: &str) -> bool {
    if !scope.is_ready() {
        return true;
    }

    let irq = cpu::save_flags_cli();
    let mut ok = true;
    unsafe {
        'levels: for lvl in 0..SKIP_LIST_LEVEL {
            let head = scope.heads().add(lvl);
            let mut node = (*head).next;
            let mut prev_timeout: Option<Tick> = None;

            while node != head {
                if (*(*node).next).prev != node || (*(*node).prev).next != node {
                    klog_error!("timer: {} list linkage broken at level {}", what, lvl);
                    ok = false;
                    break 'levels;
                }

                let t = timer_from_node(node, lvl);
                if let Some(prev) = prev_timeout {
                    if tick_before((*t).timeout_tick, prev) {
                        klog_error!("timer: {} list out of order at level {}", what, lvl);
                        ok = false;
                        break 'levels;
                    }
                }
                prev_timeout = Some((*t).timeout_tick);

                node = (*node).next;
            }
        }
    }
    cpu::restore_flags(irq);

    ok
}
