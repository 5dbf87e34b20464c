//! Backend catalog entries.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

fn default_context() -> u32 {
    128_000
}

/// One entry of the ordered backend catalog.
///
/// `model` is `<provider>:<model-id>`, where the model id may itself
/// contain colons (`synthetic:hf:org/name`). The provider token is
/// everything before the first `:`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// `<provider>:<model-id>` identifier. Must contain at least one `:`.
    pub model: String,
    /// Maximum input tokens this backend accepts.
    #[serde(default = "default_context")]
    pub context: u32,
    /// Whether the backend accepts image content.
    #[serde(default)]
    pub vision: bool,
    /// Whether the backend supports extended reasoning.
    #[serde(default)]
    pub thinking: bool,
    /// Glob patterns (`*`, `?`) matched against the incoming request
    /// model, case-insensitive. Empty matches every request model.
    #[serde(default)]
    pub model_match: Vec<String>,
    /// Keys to add to the outbound payload where absent.
    #[serde(default)]
    pub key_add: BTreeMap<String, Value>,
    /// Keys to remove from the outbound payload.
    #[serde(default)]
    pub key_delete: Vec<String>,
    /// Keys to rename in the outbound payload, old name to new name.
    #[serde(default)]
    pub key_rename: BTreeMap<String, String>,
    /// Daily token budget. Accepted and surfaced, not enforced.
    #[serde(default)]
    pub max_per_day: Option<u64>,
    /// Hourly token budget. Accepted and surfaced, not enforced.
    #[serde(default)]
    pub max_per_hour: Option<u64>,
    /// Five-hour token budget. Accepted and surfaced, not enforced.
    #[serde(default)]
    pub max_per_5h: Option<u64>,
}

impl BackendConfig {
    /// The provider token: everything before the first `:`.
    pub fn provider_token(&self) -> Option<&str> {
        self.model.split_once(':').map(|(provider, _)| provider)
    }

    /// The model id: everything after the first `:`, further colons
    /// included.
    pub fn model_id(&self) -> Option<&str> {
        self.model.split_once(':').map(|(_, id)| id)
    }

    /// Whether any unenforced rate-limit budget is set.
    pub fn has_rate_limit_fields(&self) -> bool {
        self.max_per_day.is_some() || self.max_per_hour.is_some() || self.max_per_5h.is_some()
    }
}
