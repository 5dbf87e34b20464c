//! Patchbay configuration structures to map the patchbay.toml configuration.

#![deny(missing_docs)]

mod backend;
mod limits;
mod loader;
mod provider;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub use backend::BackendConfig;
use indexmap::IndexMap;
pub use limits::{MaxTokensLimit, MinTokensLimit};
pub use provider::ProviderConfig;
use serde::Deserialize;

/// Main configuration structure for the patchbay proxy.
///
/// The file is flat at the root: server settings, token-shaping limits,
/// the `[tokens]` auth table, one `[provider.<name>]` table per upstream
/// provider, and the ordered `[[backend]]` catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Log filter string, e.g. `info` or `llm=debug,server=info`.
    pub log_level: String,
    /// Per-attempt upstream timeout in seconds.
    pub request_timeout: u64,
    /// Maximum number of failover cycles before a request is abandoned.
    pub max_retries: u32,
    /// Policy for the outbound `max_tokens` field.
    pub max_tokens_limit: MaxTokensLimit,
    /// Lower clamp bound used when `max_tokens_limit` is an integer.
    pub min_tokens_limit: MinTokensLimit,
    /// Whether to serve TLS. Requires `ssl_key_file` and `ssl_cert_file`.
    pub https_enabled: bool,
    /// PEM private key for TLS.
    pub ssl_key_file: Option<PathBuf>,
    /// PEM certificate chain for TLS.
    pub ssl_cert_file: Option<PathBuf>,
    /// CA bundle path. Accepted for surface parity, currently unused.
    pub ssl_ca_file: Option<PathBuf>,
    /// Caller auth tokens, name to token. An empty table disables auth.
    pub tokens: BTreeMap<String, String>,
    /// Upstream providers keyed by provider token.
    pub provider: IndexMap<String, ProviderConfig>,
    /// Ordered backend catalog. The first entry is the primary.
    pub backend: Vec<BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            request_timeout: 90,
            max_retries: 10,
            max_tokens_limit: MaxTokensLimit::default(),
            min_tokens_limit: MinTokensLimit::default(),
            https_enabled: false,
            ssl_key_file: None,
            ssl_cert_file: None,
            ssl_ca_file: None,
            tokens: BTreeMap::new(),
            provider: IndexMap::new(),
            backend: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file path, expanding `{{ env.NAME }}`
    /// references and validating the result.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Whether caller authentication is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Check a presented token against the token table.
    pub fn token_is_valid(&self, presented: &str) -> bool {
        self.tokens.values().any(|t| t == presented)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            host: "127.0.0.1",
            port: 8000,
            log_level: "info",
            request_timeout: 90,
            max_retries: 10,
            max_tokens_limit: Unset,
            min_tokens_limit: Limit(
                100,
            ),
            https_enabled: false,
            ssl_key_file: None,
            ssl_cert_file: None,
            ssl_ca_file: None,
            tokens: {},
            provider: {},
            backend: [],
        }
        "#);
    }

    #[test]
    fn token_table() {
        let config: Config = toml::from_str(indoc::indoc! {r#"
            [tokens]
            alice = "sk-proxy-1"
            bob = "sk-proxy-2"
        "#})
        .unwrap();

        assert!(config.auth_enabled());
        assert!(config.token_is_valid("sk-proxy-2"));
        assert!(!config.token_is_valid("sk-proxy-3"));
    }

    #[test]
    fn auth_disabled_without_tokens() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.auth_enabled());
    }

    #[test]
    fn unknown_root_keys_are_rejected() {
        let error = toml::from_str::<Config>("bogus = 1").unwrap_err();
        assert!(error.to_string().contains("bogus"));
    }
}
