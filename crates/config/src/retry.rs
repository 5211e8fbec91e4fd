use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Attempt budget and backoff between attempts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total number of attempts per request, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_base: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_max: Duration,
    /// Deadline for one whole attempt, from dispatch to the end of the stream.
    #[serde(deserialize_with = "deserialize_duration")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}
