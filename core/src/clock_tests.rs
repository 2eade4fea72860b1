//! Tests for the kernel tick counter and millisecond conversions.

use ternos_abi::WAITING_FOREVER;
use ternos_lib::testing::TestResult;
use ternos_lib::{assert_eq_test, assert_test, define_test_suite, pass};

use crate::clock::{TICKS_PER_SEC, tick_from_ms, tick_get, tick_increase, tick_set, tick_to_ms};
use crate::timer::system_timer_init;

pub fn test_tick_set_get() -> TestResult {
    tick_set(0);
    assert_eq_test!(tick_get(), 0, "counter reset");
    tick_set(12345);
    assert_eq_test!(tick_get(), 12345, "counter set");
    tick_set(0);
    pass!()
}

pub fn test_tick_increase_advances() -> TestResult {
    // tick_increase runs the hard-timer check, so the list must exist.
    system_timer_init();

    tick_set(100);
    tick_increase();
    assert_eq_test!(tick_get(), 101, "one interrupt advances one tick");
    for _ in 0..9 {
        tick_increase();
    }
    assert_eq_test!(tick_get(), 110, "ten interrupts advance ten ticks");
    tick_set(0);
    pass!()
}

pub fn test_tick_from_ms_laws() -> TestResult {
    // Negative durations mean "wait forever".
    assert_eq_test!(tick_from_ms(-1), WAITING_FOREVER, "negative maps to forever");

    assert_eq_test!(tick_from_ms(0), 0, "zero maps to zero");

    // Whole seconds convert exactly.
    for k in 1..=5i32 {
        assert_eq_test!(
            tick_from_ms(k * 1000),
            (k as u32) * TICKS_PER_SEC,
            "whole seconds convert exactly"
        );
    }

    // Sub-second remainders round up so short waits never collapse to zero.
    assert_eq_test!(tick_from_ms(1), 1, "1 ms rounds up to one tick");
    assert_eq_test!(tick_from_ms(10), 1, "10 ms is exactly one tick");
    assert_eq_test!(tick_from_ms(15), 2, "15 ms rounds up to two ticks");
    assert_eq_test!(tick_from_ms(999), 100, "999 ms rounds up to a full second");

    // Monotone in ms.
    let mut last = 0;
    for ms in [0, 1, 9, 10, 11, 100, 999, 1000, 1500, 60_000] {
        let t = tick_from_ms(ms);
        assert_test!(t >= last, "tick_from_ms must be monotonic");
        last = t;
    }

    pass!()
}

pub fn test_tick_to_ms_conversion() -> TestResult {
    tick_set(250);
    assert_eq_test!(tick_to_ms(), 2500, "250 ticks at 100 Hz is 2500 ms");
    tick_set(0);
    assert_eq_test!(tick_to_ms(), 0, "zero ticks is zero ms");
    pass!()
}

define_test_suite!(
    clock,
    [
        test_tick_set_get,
        test_tick_increase_advances,
        test_tick_from_ms_laws,
        test_tick_to_ms_conversion,
    ]
);
