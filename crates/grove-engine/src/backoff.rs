//! Randomized exponential backoff.
//!
//! Segment lock acquisition is non-blocking; contention is absorbed by
//! retrying with a randomized, exponentially growing wait. The wait before
//! retry `n` is drawn uniformly from `[0, 2^min(n, saturate))` microseconds,
//! so competing threads decorrelate instead of stampeding.

use std::time::Duration;

use rand::Rng;

/// Randomized exponential backoff state.
///
/// # Example
///
/// ```rust
/// use grove_engine::backoff::RandExpBackoff;
///
/// let mut backoff = RandExpBackoff::new(12);
/// for _ in 0..3 {
///     // try something, then:
///     backoff.wait();
/// }
/// ```
#[derive(Debug)]
pub struct RandExpBackoff {
    attempts: u32,
    saturate: u32,
}

impl RandExpBackoff {
    /// Creates a backoff with the given saturation exponent.
    #[must_use]
    pub fn new(saturate: u32) -> Self {
        Self {
            attempts: 0,
            saturate,
        }
    }

    /// Returns the number of waits performed since the last reset.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleeps for a random duration in `[0, 2^min(attempts, saturate))`
    /// microseconds, then bumps the attempt counter.
    pub fn wait(&mut self) {
        let exponent = self.attempts.min(self.saturate).min(63);
        self.attempts = self.attempts.saturating_add(1);

        let ceiling = 1u64 << exponent;
        let micros = rand::thread_rng().gen_range(0..ceiling);
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros));
        }
    }

    /// Resets the attempt counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_advance_and_reset() {
        let mut backoff = RandExpBackoff::new(4);
        assert_eq!(backoff.attempts(), 0);

        backoff.wait();
        backoff.wait();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn test_saturation_bounds_the_wait() {
        // With saturate = 0 the ceiling is 2^0 = 1, so the drawn wait is
        // always 0 and the call returns immediately.
        let mut backoff = RandExpBackoff::new(0);
        for _ in 0..100 {
            backoff.wait();
        }
        assert_eq!(backoff.attempts(), 100);
    }
}
