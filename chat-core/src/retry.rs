//! Bounded retry policy for provider throttling.
//!
//! Only throttling is retried: the provider told us to slow down, so one
//! more attempt after a fixed pause is likely to succeed. Connectivity
//! problems are surfaced with a retry hint instead, and everything else is
//! final for the attempt.

use std::time::Duration;
use talk2me_chat_types::LedgerError;

/// Retry policy for ledger reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    max_jitter: Duration,
}

impl RetryPolicy {
    /// Retry throttled calls up to `max_retries` times after `delay`.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            max_jitter: Duration::ZERO,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Add random jitter of up to `max_jitter` to every delay.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide whether to retry after `error`.
    ///
    /// `retries_done` is the number of retries already made for this call.
    /// Returns the pause before the next attempt, or `None` to give up.
    pub fn next_delay(&self, error: &LedgerError, retries_done: u32) -> Option<Duration> {
        if !matches!(error, LedgerError::RateLimited) || retries_done >= self.max_retries {
            return None;
        }
        Some(self.delay + self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(random_u64() % (max_ms + 1))
    }
}

impl Default for RetryPolicy {
    /// One retry after two seconds.
    fn default() -> Self {
        Self::fixed(1, Duration::from_secs(2))
    }
}

fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_rate_limit_once() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_delay(&LedgerError::RateLimited, 0),
            Some(Duration::from_secs(2))
        );
        assert_eq!(policy.next_delay(&LedgerError::RateLimited, 1), None);
    }

    #[test]
    fn does_not_retry_other_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_delay(&LedgerError::Connectivity("down".into()), 0),
            None
        );
        assert_eq!(policy.next_delay(&LedgerError::NotAParticipant, 0), None);
        assert_eq!(
            policy.next_delay(&LedgerError::Reverted("x".into()), 0),
            None
        );
    }

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryPolicy::none().next_delay(&LedgerError::RateLimited, 0), None);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(100))
            .with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let delay = policy.next_delay(&LedgerError::RateLimited, 0).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
