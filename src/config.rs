//! # FlipOS Configuration
//!
//! Compile-time constants governing the scheduler, plus the one runtime
//! knob: the rate multiplier that scales a tick to wall-clock time.
//! All capacity limits are fixed at compile time; no dynamic allocation
//! on the hardware port.

use core::num::NonZeroU32;
use core::time::Duration;

use crate::error::SchedError;
use crate::task::Ticks;

/// Maximum number of live tasks (excluding the idle context).
/// Sizes the TCB pool on hardware, the context cap on host, and the
/// registry map, which requires a power of two.
pub const MAX_TASKS: usize = 16;

/// Per-task stack size in bytes on the hardware port. Must hold the
/// deepest call chain plus the hardware exception frame (32 bytes)
/// and the software-saved context (32 bytes for R4–R11).
pub const STACK_SIZE: usize = 1024;

/// Stack reserved for each task thread on the host port.
pub const HOST_STACK_SIZE: usize = 256 * 1024;

/// Length of one tick at a rate multiplier of 1, in microseconds.
/// Matches the 16 ms task tick of the machine's IRQ-driven dispatcher.
pub const BASE_MICROSECONDS: u32 = 16_000;

/// Ticks in one second, rounded up so `sleep_seconds(n)` never wakes
/// before `n` seconds at the default rate.
pub const TICKS_PER_SECOND: Ticks = 1_000_000_u32.div_ceil(BASE_MICROSECONDS);

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Speed-up factor applied to the tick. A multiplier of `n` makes every
/// tick `1/n` as long; the simulator uses it to run games faster than
/// real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateMultiplier(NonZeroU32);

impl RateMultiplier {
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Validate a multiplier. It must be non-zero and small enough that a
    /// tick still lasts at least one microsecond.
    pub const fn new(value: u32) -> Result<Self, SchedError> {
        match NonZeroU32::new(value) {
            Some(v) if value <= BASE_MICROSECONDS => Ok(Self(v)),
            _ => Err(SchedError::InvalidRateMultiplier(value)),
        }
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// Process-wide scheduler configuration. Handed to `Scheduler::new` and
/// never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub rate_multiplier: RateMultiplier,
}

impl SchedulerConfig {
    pub const DEFAULT: Self = Self {
        rate_multiplier: RateMultiplier::ONE,
    };

    pub const fn with_rate_multiplier(value: u32) -> Result<Self, SchedError> {
        match RateMultiplier::new(value) {
            Ok(rate_multiplier) => Ok(Self { rate_multiplier }),
            Err(e) => Err(e),
        }
    }

    /// Wall-clock length of one tick in microseconds.
    #[inline]
    pub const fn tick_micros(&self) -> u32 {
        BASE_MICROSECONDS / self.rate_multiplier.get()
    }

    #[inline]
    pub const fn tick_duration(&self) -> Duration {
        Duration::from_micros(self.tick_micros() as u64)
    }

    /// Minimum wall-clock time covered by `ticks` ticks.
    pub fn ticks_to_duration(&self, ticks: Ticks) -> Duration {
        Duration::from_micros(u64::from(ticks) * u64::from(self.tick_micros()))
    }

    /// Number of whole ticks needed to cover `duration` (rounded up).
    pub fn duration_to_ticks(&self, duration: Duration) -> Ticks {
        let micros = duration.as_micros();
        let ticks = micros.div_ceil(u128::from(self.tick_micros()));
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }

    /// SysTick reload value producing one interrupt per tick.
    pub const fn systick_reload(&self) -> u32 {
        (SYSTEM_CLOCK_HZ / 1_000_000) * self.tick_micros() - 1
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
