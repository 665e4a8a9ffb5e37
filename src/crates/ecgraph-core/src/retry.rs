//! Retry policies for transient external-call failures.
//!
//! An external API call is attempted up to `max_attempts` times with an
//! exponentially growing delay between attempts:
//!
//! ```text
//! delay = initial_delay_ms × backoff_factor ^ attempt   (capped at max_delay_ms)
//! ```
//!
//! Jitter is available for fleet deployments but disabled by default so
//! that the backoff schedule stays deterministic.

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,

    /// Initial delay between attempts in milliseconds.
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,

    /// Upper bound on the delay between attempts in milliseconds.
    pub max_delay_ms: u64,

    /// Whether to randomize delays by a 0.5–1.5 factor.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` total attempts.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 128_000,
            jitter: false,
        }
    }

    /// Set the initial delay between attempts.
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given 0-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::ZERO;
        }
        let base = self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let delayed_ms = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };
        Duration::from_millis(delayed_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts so far.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Mutable bookkeeping for an attempt loop.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of attempts made so far.
    pub attempts: usize,

    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,
}

impl RetryState {
    /// Create an empty retry state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt and its failure message.
    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    /// Clear attempts and the last error.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.backoff_factor, 2.0);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay_ms(100)
            .with_backoff_factor(2.0);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_cap() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay_ms(10_000)
            .with_max_delay_ms(15_000);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(15_000));
    }

    #[test]
    fn test_exhausted_attempts_have_zero_delay() {
        let policy = RetryPolicy::new(2).with_initial_delay_ms(100);
        assert_eq!(policy.delay_for_attempt(2), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay_ms(1_000)
            .with_jitter(true);
        for _ in 0..20 {
            let delay = policy.delay_for_attempt(1).as_millis() as f64;
            assert!((1_000.0..=3_000.0).contains(&delay));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_state_tracking() {
        let mut state = RetryState::new();
        state.record_attempt(Some("connection reset".to_string()));
        state.record_attempt(Some("timeout".to_string()));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
        state.reset();
        assert_eq!(state.attempts, 0);
        assert!(state.last_error.is_none());
    }
}
