//! Retry schedule of failed rounds.
//!
//! A failed round is rescheduled with a growing delay: the base delay
//! shifted left by the square of the attempt number. After
//! [`MAX_RETRIES`] attempts the round is abandoned.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempts before a round is abandoned.
pub const MAX_RETRIES: u32 = 5;

/// Where a rescheduled round stands in its retry schedule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDescriptor {
    /// Failed attempts so far.
    pub attempt: u32,
    /// Unix milliseconds before which the round must not run.
    pub not_before: i64,
}

impl RetryDescriptor {
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    /// Delay before the given attempt.
    pub fn backoff(attempt: u32, base: Duration) -> Duration {
        let shift = attempt.saturating_mul(attempt);
        match 1u32.checked_shl(shift) {
            Some(factor) => base.saturating_mul(factor),
            None => Duration::MAX,
        }
    }

    /// The descriptor after one more failure, or `None` once exhausted.
    pub fn next(&self, base: Duration, max_retries: u32, now_millis: i64) -> Option<(Self, Duration)> {
        let attempt = self.attempt + 1;
        if attempt > max_retries {
            return None;
        }
        let delay = Self::backoff(attempt, base);
        let next = RetryDescriptor {
            attempt,
            not_before: now_millis.saturating_add(delay.as_millis().min(i64::MAX as u128) as i64),
        };
        Some((next, delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_with_square_of_attempt() {
        let base = Duration::from_secs(60);
        assert_eq!(RetryDescriptor::backoff(0, base), base);
        assert_eq!(RetryDescriptor::backoff(1, base), base * 2);
        assert_eq!(RetryDescriptor::backoff(2, base), base * 16);
        assert_eq!(RetryDescriptor::backoff(3, base), base * 512);
    }

    #[test]
    fn test_exhaustion() {
        let base = Duration::from_millis(1);
        let mut descriptor = RetryDescriptor::default();
        for attempt in 1..=MAX_RETRIES {
            let (next, _) = descriptor.next(base, MAX_RETRIES, 0).unwrap();
            assert_eq!(next.attempt, attempt);
            descriptor = next;
        }
        assert!(descriptor.next(base, MAX_RETRIES, 0).is_none());
    }

    #[test]
    fn test_not_before() {
        let (next, delay) = RetryDescriptor::default()
            .next(Duration::from_secs(1), MAX_RETRIES, 1_000)
            .unwrap();
        assert_eq!(delay, Duration::from_secs(2));
        assert_eq!(next.not_before, 3_000);
    }
}
