//! Backoff policy for follow-up jobs
//!
//! Handlers that want to try again later ask the policy for the delay of the
//! next attempt and return it as [`crate::NextAction::Schedule`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with jitter, bounded by a maximum number of attempts
///
/// Attempts are 1-based: attempt 1 is the first run of a job, attempt 2 the
/// first retry.
///
/// # Example
///
/// ```
/// use loyalty_jobs::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_secs(10))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.next_delay(1), Some(Duration::from_secs(10)));
/// assert_eq!(policy.next_delay(2), Some(Duration::from_secs(20)));
/// assert_eq!(policy.next_delay(4), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first run included
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor between consecutive delays
    pub backoff_coefficient: f64,

    /// Relative jitter (0.0-1.0); 0.1 spreads each delay by up to ±10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 5 attempts, 10s doubling up to 5 minutes, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(300),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Run once, never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// The same delay before every retry
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait before running `attempt` (1-based; attempt 1 has none)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry = attempt - 2;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_interval.as_secs_f64());

        let delay = if self.jitter > 0.0 && capped > 0.0 {
            let spread = capped * self.jitter;
            (capped + rand::thread_rng().gen_range(-spread..spread)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Whether another attempt may follow `attempt`
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt after `attempt`, or `None` once the budget is spent
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.has_attempts_remaining(attempt)
            .then(|| self.delay_for_attempt(attempt + 1))
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.next_delay(1), None);
    }

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(40));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(15))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(15));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(60), 3);

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10), 5).with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential().with_max_attempts(8);

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval\":10000"));

        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
