use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Settings applied while a response stream is being consumed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Longest allowed gap between two chunks of response bytes.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// Whether the idle timeout is enforced at all.
    pub idle_timeout_enabled: bool,
    /// Number of identical consecutive text fragments treated as a degenerate
    /// generation. Zero disables loop detection.
    pub loop_threshold: u32,
    /// Text returned in place of a generation the provider rejected on content
    /// policy grounds.
    pub refusal_message: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(40),
            idle_timeout_enabled: true,
            loop_threshold: 200,
            refusal_message: "I'm sorry, but I can't help with that request.".to_string(),
        }
    }
}
