//! Upstream chat-completion endpoint settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Endpoint the client posts chat-completion requests to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: Url,
    /// Path appended to `base_url` for chat completions.
    pub path: String,
    /// Bearer token sent in the `Authorization` header.
    pub api_key: Option<SecretString>,
    /// Maximum time to establish a TCP/TLS connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://openrouter.ai/api/v1").expect("default URL should be valid"),
            path: "/chat/completions".to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("steadfast/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EndpointConfig {
    /// Full URL of the chat-completion endpoint.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}
