//! Cycle counters
//!
//! Provides:
//! - RDTSC-based cycle counting on x86_64, monotonic nanoseconds elsewhere
//! - Frequency calibration against the system clock
//! - A deterministic stepping clock for tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Source of the per-core cycle counter
pub trait CycleSource: Send + Sync {
    fn cycles(&self) -> u64;

    /// Counter frequency in Hz
    fn hz(&self) -> u64;
}

/// Read the Time Stamp Counter
///
/// On modern CPUs with constant_tsc this is monotonic and consistent across
/// cores. Other targets count nanoseconds since first use.
#[inline]
pub fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        unsafe { std::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        static START: OnceLock<Instant> = OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

/// Hardware cycle counter with a known frequency
#[derive(Debug, Clone, Copy)]
pub struct Tsc {
    hz: u64,
}

impl Tsc {
    /// Use a known counter frequency
    pub fn with_hz(hz: u64) -> Self {
        Self { hz: hz.max(1) }
    }

    /// Calibrate the counter frequency by busy-waiting for `duration`
    pub fn calibrate(duration: Duration) -> Self {
        let start_cycles = rdtsc();
        let start_time = Instant::now();

        while start_time.elapsed() < duration {
            std::hint::spin_loop();
        }

        let cycles = rdtsc().wrapping_sub(start_cycles);
        let elapsed = start_time.elapsed().as_secs_f64();
        let hz = if elapsed > 0.0 {
            (cycles as f64 / elapsed) as u64
        } else {
            1
        };

        Self::with_hz(hz)
    }

    /// Calibrated once per process
    pub fn shared() -> Self {
        static CALIBRATED: OnceLock<Tsc> = OnceLock::new();
        *CALIBRATED.get_or_init(|| Tsc::calibrate(Duration::from_millis(100)))
    }
}

impl CycleSource for Tsc {
    #[inline]
    fn cycles(&self) -> u64 {
        rdtsc()
    }

    fn hz(&self) -> u64 {
        self.hz
    }
}

/// Clock that advances by a fixed step on every read
#[derive(Debug)]
pub struct StepClock {
    now: AtomicU64,
    step: u64,
    hz: u64,
}

impl StepClock {
    pub fn new(start: u64, step: u64, hz: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step,
            hz,
        }
    }

    /// Move the clock to an absolute value
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Value the next read will return
    pub fn peek(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl CycleSource for StepClock {
    fn cycles(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }

    fn hz(&self) -> u64 {
        self.hz
    }
}
