// Implements the idle backoff used by workers parking on an empty ready
// queue.

use std::time::Duration;

const DEFAULT_FACTOR: u32 = 2;
const DEFAULT_JITTER: f32 = 0.5;
const DEFAULT_MIN_DURATION: Duration = Duration::from_micros(500);
const DEFAULT_MAX_DURATION: Duration = Duration::from_millis(100);

/// Exponentially growing park duration with jitter.
///
/// Each consecutive idle round stretches the next park window up to
/// `max_duration`; any dispatched work resets the sequence so a busy
/// scheduler stays responsive.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    factor: u32,
    jitter: f32,
    min_duration: Duration,
    max_duration: Duration,
    attempt: u32,
    rng: fastrand::Rng,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_FACTOR,
            DEFAULT_JITTER,
            DEFAULT_MIN_DURATION,
            DEFAULT_MAX_DURATION,
        )
    }
}

impl IdleBackoff {
    #[must_use]
    pub fn new(factor: u32, jitter: f32, min_duration: Duration, max_duration: Duration) -> Self {
        assert!(
            jitter > 0f32 && jitter < 1f32,
            "<idle-backoff>: jitter must be between 0 and 1."
        );
        Self {
            factor,
            jitter,
            min_duration,
            max_duration,
            attempt: 0,
            rng: fastrand::Rng::new(),
        }
    }

    /// Forget accumulated idleness. Called whenever a worker dispatches.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next park duration, growing exponentially with consecutive calls.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.factor.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let duration = self.min_duration.saturating_mul(exponent);

        // Apply jitter - use multiples of 100 to avoid relying on floats.
        let jitter_factor = (self.jitter * 100f32) as u32;
        let random = self.rng.u32(0..jitter_factor * 2);

        let mut duration = duration.saturating_mul(100);
        if random < jitter_factor {
            let jitter = duration.saturating_mul(random) / 100;
            duration = duration.saturating_sub(jitter);
        } else {
            let jitter = duration.saturating_mul(random / 2) / 100;
            duration = duration.saturating_add(jitter);
        }
        duration /= 100;

        duration.clamp(self.min_duration, self.max_duration)
    }
}
