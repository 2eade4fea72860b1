#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]
#![allow(static_mut_refs)]

pub mod clock;
pub mod clock_tests;
pub mod sched;
pub mod timer;
pub mod timer_tests;

pub use clock::{TICKS_PER_SEC, tick_from_ms, tick_get, tick_increase, tick_set, tick_to_ms};
pub use timer::{
    Timer, TimerControl, TimerError, TimerFlags, soft_timer_check, system_timer_init,
    system_timer_thread_init, timer_check, timer_next_timeout_tick,
};
