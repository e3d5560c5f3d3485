// Implements the monotonic time base every deadline, release point and
// watchdog timer in the kernel is expressed in.

use std::time::{Duration, Instant};

/// Marker value for "no deadline" in the microsecond time base.
pub(crate) const NO_DEADLINE_US: u64 = u64::MAX;

/// Monotonic clock anchored at an epoch captured on construction.
///
/// `now` reports seconds as a high precision float for the public surface;
/// `now_micros` reports the same instant as integer microseconds, which is
/// the representation stored in per-task atomics.
#[derive(Debug, Clone)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock's epoch. Never goes backwards.
    #[must_use]
    pub fn now(&self) -> f64 {
        secs_from_micros(self.now_micros())
    }

    /// Microseconds elapsed since the clock's epoch.
    #[must_use]
    pub fn now_micros(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

pub(crate) fn micros_from_duration(dur: Duration) -> u64 {
    u64::try_from(dur.as_micros()).unwrap_or(u64::MAX)
}

pub(crate) fn secs_from_micros(micros: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let secs = micros as f64 / 1_000_000.0;
    secs
}
