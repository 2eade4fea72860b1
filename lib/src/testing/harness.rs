// Test harness types: TestSuiteResult, TestSuiteDesc.
// Suites are declared with define_test_suite! and registered explicitly by
// the ternos-tests crate.

/// Maximum number of test suites that can be registered.
pub const HARNESS_MAX_SUITES: usize = 16;

/// Default cycles per millisecond estimate (3 GHz).
const DEFAULT_CYCLES_PER_MS: u64 = 3_000_000;

/// Result of executing a single test suite.
#[derive(Clone, Copy)]
pub struct TestSuiteResult {
    pub name: &'static str,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub elapsed_ms: u32,
}

impl Default for TestSuiteResult {
    fn default() -> Self {
        Self::new("")
    }
}

impl TestSuiteResult {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            total: 0,
            passed: 0,
            failed: 0,
            elapsed_ms: 0,
        }
    }

    /// Fill in results from a (passed, total) pair and elapsed time.
    pub fn fill(&mut self, passed: u32, total: u32, elapsed_ms: u32) {
        self.total = total;
        self.passed = passed;
        self.failed = total.saturating_sub(passed);
        self.elapsed_ms = elapsed_ms;
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub type SuiteRunnerFn = fn(&mut TestSuiteResult) -> i32;

#[derive(Clone, Copy)]
pub struct TestSuiteDesc {
    pub name: &'static str,
    pub run: Option<SuiteRunnerFn>,
}

// SAFETY: only a static string slice and a function pointer, both read-only.
unsafe impl Sync for TestSuiteDesc {}

/// Convert a TSC cycle delta to an approximate millisecond count.
///
/// The harness runs before any clock calibration, so a fixed 3 GHz estimate
/// is used; the value is informational only.
pub fn cycles_to_ms(cycles: u64) -> u32 {
    (cycles / DEFAULT_CYCLES_PER_MS) as u32
}

pub fn measure_elapsed_ms(start: u64, end: u64) -> u32 {
    cycles_to_ms(end.wrapping_sub(start))
}
