//! Tests for the skip-list timer facility.
//!
//! Covers: hard-timer expiry order (FIFO among equal deadlines), one-shot
//! vs periodic behaviour, tick wrap-around, soft-timer drift, control
//! commands, self-restart and cross-delete from callbacks, and skip-list
//! ordering invariants at every level.

use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use ternos_abi::TICK_MAX;
use ternos_lib::testing::TestResult;
use ternos_lib::{assert_eq_test, assert_not_null, assert_test, define_test_suite, pass};
use ternos_mm::system_heap_init;

use crate::clock::{tick_get, tick_increase, tick_set};
use crate::timer::{
    Timer, TimerControl, TimerError, TimerFlags, soft_timer_check, system_timer_init,
    system_timer_thread_init, timer_control, timer_create, timer_delete, timer_detach, timer_init,
    timer_lists_consistent, timer_next_timeout_tick, timer_start, timer_stop,
};

// =============================================================================
// Recording callbacks
// =============================================================================

const MAX_EVENTS: usize = 8;

/// Sequence of callback tags, in fire order.
static FIRE_LOG: [AtomicU32; MAX_EVENTS] = [const { AtomicU32::new(0) }; MAX_EVENTS];
static FIRE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn reset_fire_log() {
    FIRE_SEQ.store(0, Ordering::Relaxed);
    for slot in FIRE_LOG.iter() {
        slot.store(u32::MAX, Ordering::Relaxed);
    }
}

fn fired_count() -> usize {
    FIRE_SEQ.load(Ordering::Relaxed)
}

fn fired_tag(idx: usize) -> u32 {
    FIRE_LOG[idx].load(Ordering::Relaxed)
}

/// Records the tag passed as parameter, in call order.
fn record_cb(parameter: *mut c_void) {
    let tag = parameter as usize as u32;
    let idx = FIRE_SEQ.fetch_add(1, Ordering::Relaxed);
    if idx < MAX_EVENTS {
        FIRE_LOG[idx].store(tag, Ordering::Relaxed);
    }
}

fn noop_cb(_parameter: *mut c_void) {}

fn tag(value: u32) -> *mut c_void {
    value as usize as *mut c_void
}

// =============================================================================
// Hard-timer dispatch order
// =============================================================================

pub fn test_hard_timer_fifo_ordering() -> TestResult {
    system_timer_init();
    system_heap_init();
    reset_fire_log();
    tick_set(0);

    // Identical deadlines for t1/t2; t3 expires later.
    let t1 = timer_create("t_ord1", record_cb, tag(1), 5, TimerFlags::empty());
    let t2 = timer_create("t_ord2", record_cb, tag(2), 5, TimerFlags::empty());
    let t3 = timer_create("t_ord3", record_cb, tag(3), 10, TimerFlags::empty());
    assert_not_null!(t1, "create t1");
    assert_not_null!(t2, "create t2");
    assert_not_null!(t3, "create t3");

    let _ = timer_start(t1);
    let _ = timer_start(t2);
    let _ = timer_start(t3);
    assert_test!(timer_lists_consistent(), "lists consistent after start");

    for _ in 0..5 {
        tick_increase();
    }
    // Equal-deadline timers fire in start order.
    assert_eq_test!(fired_count(), 2, "t1 and t2 fired at tick 5");
    assert_eq_test!(fired_tag(0), 1, "t1 first");
    assert_eq_test!(fired_tag(1), 2, "t2 second");

    for _ in 0..5 {
        tick_increase();
    }
    assert_eq_test!(fired_count(), 3, "t3 fired at tick 10");
    assert_eq_test!(fired_tag(2), 3, "t3 last");

    let _ = timer_delete(t1);
    let _ = timer_delete(t2);
    let _ = timer_delete(t3);
    pass!()
}

pub fn test_hard_timer_one_shot_deactivates() -> TestResult {
    system_timer_init();
    system_heap_init();
    reset_fire_log();
    tick_set(0);

    let t = timer_create("t_oneshot", record_cb, tag(7), 3, TimerFlags::empty());
    assert_not_null!(t, "create");
    let _ = timer_start(t);

    for _ in 0..10 {
        tick_increase();
    }
    assert_eq_test!(fired_count(), 1, "one-shot fires exactly once");

    let mut active = true;
    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(!active, "one-shot deactivates after expiry");
    assert_eq_test!(timer_stop(t), Err(TimerError::NotActive), "stop after expiry errors");

    let _ = timer_delete(t);
    pass!()
}

pub fn test_hard_timer_periodic_rearms() -> TestResult {
    system_timer_init();
    system_heap_init();
    reset_fire_log();
    tick_set(0);

    let t = timer_create("t_per", record_cb, tag(4), 4, TimerFlags::PERIODIC);
    assert_not_null!(t, "create");
    let _ = timer_start(t);

    for _ in 0..12 {
        tick_increase();
    }
    // Fires at 4, 8, 12: the restart recomputes from the current tick and
    // the callback consumes no time here.
    assert_eq_test!(fired_count(), 3, "periodic fired every 4 ticks");

    let mut active = false;
    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(active, "periodic stays active");
    assert_eq_test!(timer_stop(t), Ok(()), "stop succeeds while armed");

    let _ = timer_delete(t);
    pass!()
}

// =============================================================================
// Tick wrap-around
// =============================================================================

pub fn test_timer_survives_tick_wrap() -> TestResult {
    system_timer_init();
    system_heap_init();
    reset_fire_log();
    tick_set(TICK_MAX - 3);

    let t = timer_create("t_wrap", record_cb, tag(9), 10, TimerFlags::empty());
    assert_not_null!(t, "create");
    let _ = timer_start(t);

    // Up to TICK_MAX: the deadline has wrapped past zero, not expired.
    for _ in 0..3 {
        tick_increase();
    }
    assert_eq_test!(fired_count(), 0, "not fired before the wrap");

    // Through the wrap and on to the deadline.
    for _ in 0..7 {
        tick_increase();
    }
    assert_eq_test!(fired_count(), 1, "fired after the wrap");

    let _ = timer_delete(t);
    tick_set(0);
    pass!()
}

// =============================================================================
// Soft timers
// =============================================================================

const DRIFT_EVENTS: usize = 4;
static DRIFT_LOG: [AtomicU32; DRIFT_EVENTS] = [const { AtomicU32::new(0) }; DRIFT_EVENTS];
static DRIFT_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Records the expiry tick, then burns three ticks of "callback time".
fn drift_cb(_parameter: *mut c_void) {
    let idx = DRIFT_SEQ.fetch_add(1, Ordering::Relaxed);
    if idx < DRIFT_EVENTS {
        DRIFT_LOG[idx].store(tick_get(), Ordering::Relaxed);
    }
    tick_set(tick_get().wrapping_add(3));
}

pub fn test_soft_timer_periodic_drift() -> TestResult {
    system_timer_init();
    system_timer_thread_init();
    system_heap_init();
    tick_set(0);
    DRIFT_SEQ.store(0, Ordering::Relaxed);

    let t = timer_create(
        "t_drift",
        drift_cb,
        ptr::null_mut(),
        10,
        TimerFlags::PERIODIC | TimerFlags::SOFT_TIMER,
    );
    assert_not_null!(t, "create");
    let _ = timer_start(t);

    // Drive the soft scope the way the timer thread would, one tick at a
    // time. Each callback consumes 3 ticks, and the periodic restart
    // counts from the moment the callback returned — so the observed
    // expiries drift: 10, 23, 36.
    while tick_get() < 40 {
        tick_set(tick_get() + 1);
        soft_timer_check();
    }

    assert_eq_test!(DRIFT_SEQ.load(Ordering::Relaxed), 3, "three expiries by tick 40");
    assert_eq_test!(DRIFT_LOG[0].load(Ordering::Relaxed), 10, "first expiry on schedule");
    assert_eq_test!(DRIFT_LOG[1].load(Ordering::Relaxed), 23, "second expiry drifted");
    assert_eq_test!(DRIFT_LOG[2].load(Ordering::Relaxed), 36, "third expiry drifted");

    let _ = timer_delete(t);
    tick_set(0);
    pass!()
}

// =============================================================================
// Control commands
// =============================================================================

pub fn test_timer_control_commands() -> TestResult {
    system_timer_init();
    system_heap_init();
    tick_set(0);

    let t = timer_create("t_ctrl", noop_cb, ptr::null_mut(), 10, TimerFlags::empty());
    assert_not_null!(t, "create");

    let mut time = 0;
    let _ = timer_control(t, TimerControl::GetTime(&mut time));
    assert_eq_test!(time, 10, "initial interval");

    let _ = timer_control(t, TimerControl::SetTime(20));
    let _ = timer_control(t, TimerControl::GetTime(&mut time));
    assert_eq_test!(time, 20, "interval updated");

    let mut active = true;
    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(!active, "not active before start");

    tick_set(100);
    let _ = timer_start(t);
    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(active, "active after start");

    // The new interval applies to this arming: expiry = 100 + 20.
    let mut remain = 0;
    let _ = timer_control(t, TimerControl::GetRemainTime(&mut remain));
    assert_eq_test!(remain, 120, "absolute expiry tick");

    let _ = timer_control(t, TimerControl::SetPeriodic);
    assert_test!(
        unsafe { (*t).flags().contains(TimerFlags::PERIODIC) },
        "periodic bit set"
    );
    let _ = timer_control(t, TimerControl::SetOneshot);
    assert_test!(
        !unsafe { (*t).flags().contains(TimerFlags::PERIODIC) },
        "periodic bit cleared"
    );

    let _ = timer_delete(t);
    tick_set(0);
    pass!()
}

pub fn test_timer_stop_inactive_errors() -> TestResult {
    system_timer_init();
    system_heap_init();

    let t = timer_create("t_stop", noop_cb, ptr::null_mut(), 5, TimerFlags::empty());
    assert_not_null!(t, "create");

    assert_eq_test!(timer_stop(t), Err(TimerError::NotActive), "stop before start");
    assert_eq_test!(timer_start(t), Ok(()), "start");
    assert_eq_test!(timer_stop(t), Ok(()), "stop while armed");
    assert_eq_test!(timer_stop(t), Err(TimerError::NotActive), "second stop errors");

    let _ = timer_delete(t);
    pass!()
}

// =============================================================================
// Callback re-entrancy
// =============================================================================

static RESTART_TIMER: AtomicPtr<Timer> = AtomicPtr::new(ptr::null_mut());
static RESTART_COUNT: AtomicU32 = AtomicU32::new(0);

/// One-shot callback that re-arms its own timer on the first expiry.
fn restart_cb(_parameter: *mut c_void) {
    let count = RESTART_COUNT.fetch_add(1, Ordering::Relaxed);
    if count == 0 {
        let timer = RESTART_TIMER.load(Ordering::Relaxed);
        let _ = timer_start(timer);
    }
}

pub fn test_timer_restart_from_own_callback() -> TestResult {
    system_timer_init();
    system_heap_init();
    tick_set(0);
    RESTART_COUNT.store(0, Ordering::Relaxed);

    let t = timer_create("t_restart", restart_cb, ptr::null_mut(), 5, TimerFlags::empty());
    assert_not_null!(t, "create");
    RESTART_TIMER.store(t, Ordering::Relaxed);

    let _ = timer_start(t);
    for _ in 0..5 {
        tick_increase();
    }
    assert_eq_test!(RESTART_COUNT.load(Ordering::Relaxed), 1, "first expiry at tick 5");

    // The callback re-armed the timer at tick 5, so it expires again at 10.
    let mut active = false;
    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(active, "timer re-armed by its own callback");

    for _ in 0..5 {
        tick_increase();
    }
    assert_eq_test!(RESTART_COUNT.load(Ordering::Relaxed), 2, "second expiry at tick 10");

    let _ = timer_control(t, TimerControl::GetState(&mut active));
    assert_test!(!active, "no further re-arm");

    let _ = timer_delete(t);
    tick_set(0);
    pass!()
}

static VICTIM_TIMER: AtomicPtr<Timer> = AtomicPtr::new(ptr::null_mut());

/// Deletes another (still pending) timer from inside a callback.
fn assassin_cb(_parameter: *mut c_void) {
    let victim = VICTIM_TIMER.swap(ptr::null_mut(), Ordering::Relaxed);
    if !victim.is_null() {
        let _ = timer_delete(victim);
    }
}

pub fn test_timer_delete_other_from_callback() -> TestResult {
    system_timer_init();
    system_heap_init();
    reset_fire_log();
    tick_set(0);

    let assassin = timer_create("t_assassin", assassin_cb, ptr::null_mut(), 5, TimerFlags::empty());
    let victim = timer_create("t_victim", record_cb, tag(66), 10, TimerFlags::empty());
    assert_not_null!(assassin, "create assassin");
    assert_not_null!(victim, "create victim");
    VICTIM_TIMER.store(victim, Ordering::Relaxed);

    let _ = timer_start(assassin);
    let _ = timer_start(victim);

    for _ in 0..15 {
        tick_increase();
    }
    assert_eq_test!(fired_count(), 0, "victim deleted before its deadline");
    assert_test!(
        VICTIM_TIMER.load(Ordering::Relaxed).is_null(),
        "assassin ran exactly once"
    );
    assert_test!(timer_lists_consistent(), "lists consistent after cross-delete");

    let _ = timer_delete(assassin);
    tick_set(0);
    pass!()
}

// =============================================================================
// Skip list structure
// =============================================================================

pub fn test_skip_list_ordering_invariant() -> TestResult {
    system_timer_init();
    system_heap_init();
    tick_set(0);

    // Enough inserts to hit the express levels (every fourth insert
    // promotes at least one level with SKIP_LIST_MASK = 0x3).
    let intervals: [u32; 8] = [30, 10, 50, 10, 20, 40, 60, 5];
    let mut timers: [*mut Timer; 8] = [ptr::null_mut(); 8];
    for (i, interval) in intervals.iter().enumerate() {
        let t = timer_create("t_skip", noop_cb, ptr::null_mut(), *interval, TimerFlags::empty());
        assert_not_null!(t, "create");
        let _ = timer_start(t);
        timers[i] = t;
    }

    assert_test!(timer_lists_consistent(), "every level sorted and linked");
    assert_eq_test!(timer_next_timeout_tick(), 5, "earliest deadline wins");

    // Restarting an armed timer re-queues it at its new deadline.
    tick_set(2);
    let _ = timer_start(timers[7]);
    assert_test!(timer_lists_consistent(), "consistent after restart");
    assert_eq_test!(timer_next_timeout_tick(), 7, "restart moved the deadline");

    for t in timers {
        let _ = timer_delete(t);
    }
    assert_eq_test!(timer_next_timeout_tick(), TICK_MAX, "empty list reports the default");
    assert_test!(timer_lists_consistent(), "consistent after teardown");
    tick_set(0);
    pass!()
}

// =============================================================================
// Static init path
// =============================================================================

pub fn test_timer_static_init_and_detach() -> TestResult {
    system_timer_init();
    tick_set(0);

    static mut SLOT: MaybeUninit<Timer> = MaybeUninit::uninit();
    let t = unsafe { SLOT.as_mut_ptr() };

    unsafe { timer_init(t, "t_static", noop_cb, ptr::null_mut(), 7, TimerFlags::empty()) };
    assert_eq_test!(unsafe { (*t).init_tick() }, 7, "interval stored");
    assert_eq_test!(unsafe { (*t).name() }, "t_static", "name stored");

    assert_eq_test!(timer_start(t), Ok(()), "start static timer");
    assert_eq_test!(timer_next_timeout_tick(), 7, "queued on the hard list");

    assert_eq_test!(timer_detach(t), Ok(()), "detach");
    assert_eq_test!(timer_next_timeout_tick(), TICK_MAX, "detach unlinked it");
    pass!()
}

define_test_suite!(
    timer,
    [
        test_hard_timer_fifo_ordering,
        test_hard_timer_one_shot_deactivates,
        test_hard_timer_periodic_rearms,
        test_timer_survives_tick_wrap,
        test_soft_timer_periodic_drift,
        test_timer_control_commands,
        test_timer_stop_inactive_errors,
        test_timer_restart_from_own_callback,
        test_timer_delete_other_from_callback,
        test_skip_list_ordering_invariant,
        test_timer_static_init_and_detach,
    ]
);
