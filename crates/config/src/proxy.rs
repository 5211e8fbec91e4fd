//! Egress proxy pool settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Proxy pool and dispatch concurrency.
///
/// An empty `pool` fails every dispatch unless `direct` is set, in which case
/// requests go straight to the endpoint, still bounded by `max_concurrency`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Send requests without a proxy while the pool is empty.
    pub direct: bool,
    /// Maximum number of dispatches in flight at the same time.
    pub max_concurrency: usize,
    /// Failures after which a proxy is excluded until its cooldown elapses.
    pub failure_threshold: u32,
    /// How long a proxy stays excluded after its last failure.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cooldown: Duration,
    /// The proxies, in preference order for equally healthy entries.
    pub pool: Vec<ProxyEntryConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            direct: false,
            max_concurrency: 5,
            failure_threshold: 10,
            cooldown: Duration::from_secs(30 * 60),
            pool: Vec::new(),
        }
    }
}

/// A single egress proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyEntryConfig {
    /// Proxy URL, e.g. `http://10.0.0.1:3128` or `socks5://host:1080`.
    pub url: Url,
    /// Basic-auth user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<SecretString>,
}

impl ProxyEntryConfig {
    /// Address used in logs and diagnostics, without credentials.
    pub fn label(&self) -> String {
        match (self.url.host_str(), self.url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}://{host}:{port}", self.url.scheme()),
            (Some(host), None) => format!("{}://{host}", self.url.scheme()),
            _ => self.url.scheme().to_string(),
        }
    }
}
