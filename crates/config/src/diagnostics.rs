use serde::Deserialize;

/// Limits for the request/response excerpts attached to failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Maximum number of characters kept from the request tail and from the
    /// response body.
    pub excerpt_limit: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { excerpt_limit: 2000 }
    }
}
