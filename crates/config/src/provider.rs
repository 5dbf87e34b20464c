//! Upstream provider configuration.

use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for a single upstream provider, keyed in the file by the
/// provider token (the part of a backend's `model` before the first `:`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API key sent to the provider.
    pub api_key: SecretString,
    /// Base URL of the provider API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Azure-style API version. Presence selects the Azure endpoint
    /// pattern and the `api-key` authorization header.
    #[serde(default)]
    pub api_version: Option<String>,
}

impl ProviderConfig {
    /// Base URL with any trailing slash removed.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Whether this provider uses the Azure-style endpoint pattern.
    pub fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }
}
