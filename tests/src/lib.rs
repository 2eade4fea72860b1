//! In-kernel test suite registry.
//!
//! Suites are declared next to the code they exercise with
//! `define_test_suite!` and registered here by [`tests_register_system_suites`].
//! The boot path (or an operator command) calls [`tests_run_all`] once the
//! heap and timer lists are up.

#![no_std]
#![allow(static_mut_refs)]

use ternos_lib::klog_info;
use ternos_lib::testing::{HARNESS_MAX_SUITES, TestSuiteDesc, TestSuiteResult};

pub const TESTS_MAX_SUITES: usize = HARNESS_MAX_SUITES;

static mut REGISTRY: [Option<&'static TestSuiteDesc>; TESTS_MAX_SUITES] = [None; TESTS_MAX_SUITES];
static mut REGISTRY_COUNT: usize = 0;

fn registry_mut() -> *mut [Option<&'static TestSuiteDesc>; TESTS_MAX_SUITES] {
    &raw mut REGISTRY
}

fn registry_count_mut() -> *mut usize {
    &raw mut REGISTRY_COUNT
}

pub fn tests_reset_registry() {
    unsafe {
        (*registry_mut()).iter_mut().for_each(|slot| *slot = None);
        *registry_count_mut() = 0;
    }
}

pub fn tests_register_suite(desc: &'static TestSuiteDesc) -> i32 {
    if desc.run.is_none() {
        return -1;
    }
    unsafe {
        if *registry_count_mut() >= TESTS_MAX_SUITES {
            return -1;
        }
        (*registry_mut())[*registry_count_mut()] = Some(desc);
        *registry_count_mut() += 1;
    }
    0
}

/// Register every built-in suite: heap allocator, tick counter, timers.
pub fn tests_register_system_suites() {
    tests_register_suite(&ternos_mm::small_mem_tests::SMALL_MEM_SUITE_DESC);
    tests_register_suite(&ternos_core::clock_tests::CLOCK_SUITE_DESC);
    tests_register_suite(&ternos_core::timer_tests::TIMER_SUITE_DESC);
}

/// Run every registered suite and log a per-suite and overall summary.
///
/// Returns true when every test in every suite passed.
pub fn tests_run_all() -> bool {
    let mut all_passed = true;
    let mut suites_run = 0usize;

    unsafe {
        for slot in (*registry_mut()).iter().take(*registry_count_mut()) {
            let Some(desc) = slot else { continue };
            let Some(run) = desc.run else { continue };

            let mut result = TestSuiteResult::new(desc.name);
            let rc = run(&mut result);
            suites_run += 1;

            klog_info!(
                "suite {}: {}/{} passed in {} ms",
                result.name,
                result.passed,
                result.total,
                result.elapsed_ms
            );
            if rc != 0 || !result.all_passed() {
                all_passed = false;
            }
        }
    }

    klog_info!(
        "test run complete: {} suites, {}",
        suites_run,
        if all_passed { "all passed" } else { "FAILURES" }
    );
    all_passed
}
