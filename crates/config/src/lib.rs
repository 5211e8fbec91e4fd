//! Configuration for the resilient chat-completion client.

mod diagnostics;
mod endpoint;
mod loader;
mod proxy;
mod retry;
mod stream;

use std::path::Path;

use serde::Deserialize;

pub use diagnostics::DiagnosticsConfig;
pub use endpoint::EndpointConfig;
pub use proxy::{ProxyConfig, ProxyEntryConfig};
pub use retry::RetryConfig;
pub use stream::StreamConfig;

/// Top-level client configuration, usually read from a TOML file.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where chat-completion requests are sent.
    pub endpoint: EndpointConfig,
    /// Attempt budget, backoff and per-attempt deadline.
    pub retry: RetryConfig,
    /// Idle-timeout and loop-detection settings for response streams.
    pub stream: StreamConfig,
    /// Egress proxy pool and dispatch concurrency.
    pub proxy: ProxyConfig,
    /// Limits for diagnostic excerpts attached to errors.
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// Load, expand and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> anyhow::Result<Config> {
        loader::parse(content)
    }
}
