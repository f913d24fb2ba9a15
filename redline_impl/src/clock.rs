//! A cheap monotonic tick source, used for the latency counters.
//!
//! On x86_64 the ticks are raw `rdtsc` values; elsewhere they are
//! nanoseconds derived from [`std::time::Instant`]. The tick frequency is
//! calibrated once per process against a 100 ms `Instant`-bounded sleep.

use std::time::{Duration, Instant};

#[derive(Debug)]
struct Calibration {
    per_s: i64,
    per_ms: i64,
    per_us: i64,
}

#[cfg(not(target_arch = "x86_64"))]
lazy_static! {
    static ref BASE: Instant = Instant::now();
}

lazy_static! {
    static ref CALIBRATION: Calibration = calibrate();
}

/// Returns the current tick value.
#[cfg(target_arch = "x86_64")]
pub fn tsc() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    unsafe {
        core::arch::x86_64::_rdtsc() as i64
    }
}

/// Returns the current tick value.
#[cfg(not(target_arch = "x86_64"))]
pub fn tsc() -> i64 {
    i64::try_from(BASE.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Ticks per second.
pub fn tsc_per_s() -> i64 {
    CALIBRATION.per_s
}

/// Ticks per millisecond.
pub fn tsc_per_ms() -> i64 {
    CALIBRATION.per_ms
}

/// Ticks per microsecond.
pub fn tsc_per_us() -> i64 {
    CALIBRATION.per_us
}

fn calibrate() -> Calibration {
    // warm up both sources
    for _ in 0..100 {
        let _ = Instant::now();
        let _ = tsc();
    }

    let start = Instant::now();
    let c1 = tsc();
    std::thread::sleep(Duration::from_millis(100));
    let mut elapsed = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
    let c2 = tsc();
    if elapsed <= 0 {
        elapsed = 100_000_000;
    }
    let n = c2.saturating_sub(c1);

    // floors guard against division by zero on degenerate platforms
    Calibration {
        per_s: (n.saturating_mul(1_000_000_000) / elapsed).max(1_000_000_000),
        per_ms: (n.saturating_mul(1_000_000) / elapsed).max(1_000_000),
        per_us: (n.saturating_mul(1_000) / elapsed).max(1_000),
    }
}
