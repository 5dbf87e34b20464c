//! Backend catalog and capability-aware selection.

use std::collections::BTreeMap;

use config::{BackendConfig, Config};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Payload transforms attached to a backend.
#[derive(Debug, Clone, Default)]
pub struct Transforms {
    pub add: BTreeMap<String, Value>,
    pub delete: Vec<String>,
    pub rename: BTreeMap<String, String>,
}

impl Transforms {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty() && self.rename.is_empty()
    }
}

/// Runtime form of one catalog entry.
///
/// The provider token and model id are split out of the configured
/// `<provider>:<model-id>` string at construction, and `model_match`
/// globs are compiled to anchored case-insensitive regexes.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Full `<provider>:<model-id>` identifier.
    pub model: String,
    /// Provider token: everything before the first `:`.
    pub provider: String,
    /// Model id: everything after the first `:`, further colons included.
    pub model_id: String,
    /// Maximum input tokens this backend accepts.
    pub context: u32,
    pub vision: bool,
    pub thinking: bool,
    matchers: Vec<Regex>,
    pub transforms: Transforms,
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Self> {
        let Some((provider, model_id)) = config.model.split_once(':') else {
            anyhow::bail!(
                "backend model '{}' is missing the provider prefix; expected '<provider>:<model-id>'",
                config.model
            );
        };

        let matchers = config
            .model_match
            .iter()
            .map(|pattern| compile_glob(pattern))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            model: config.model.clone(),
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            context: config.context,
            vision: config.vision,
            thinking: config.thinking,
            matchers,
            transforms: Transforms {
                add: config.key_add.clone(),
                delete: config.key_delete.clone(),
                rename: config.key_rename.clone(),
            },
        })
    }

    /// Whether the incoming request model matches this backend's
    /// `model_match` patterns. An empty pattern list matches everything.
    pub fn matches_model(&self, request_model: &str) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|matcher| matcher.is_match(request_model))
    }
}

/// Translate a glob pattern (`*`, `?`) to an anchored case-insensitive
/// regex.
fn compile_glob(pattern: &str) -> anyhow::Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');

    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }

    translated.push('$');

    RegexBuilder::new(&translated)
        .case_insensitive(true)
        .build()
        .map_err(|e| anyhow::anyhow!("invalid model_match pattern '{pattern}': {e}"))
}

/// Capabilities a request requires from its backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs {
    pub vision: bool,
    pub thinking: bool,
}

impl Needs {
    /// Detect required capabilities from a raw request body of either
    /// dialect.
    pub fn of_request(body: &Value) -> Self {
        Self {
            vision: request_has_images(body),
            thinking: request_wants_thinking(body),
        }
    }
}

fn request_has_images(body: &Value) -> bool {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return false;
    };

    messages
        .iter()
        .filter(|message| message.get("role").and_then(Value::as_str) == Some("user"))
        .filter_map(|message| message.get("content").and_then(Value::as_array))
        .flatten()
        .any(|block| {
            matches!(
                block.get("type").and_then(Value::as_str),
                Some("image") | Some("image_url")
            )
        })
}

fn request_wants_thinking(body: &Value) -> bool {
    if body
        .get("thinking")
        .and_then(|thinking| thinking.get("type"))
        .and_then(Value::as_str)
        == Some("enabled")
    {
        return true;
    }

    if body.get("reasoning_mode").and_then(Value::as_bool) == Some(true) {
        return true;
    }

    let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
    model.contains("o1") || model.contains("o3")
}

/// The ordered, read-only backend catalog. Built once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    backends: Vec<Backend>,
}

impl Catalog {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backends = config
            .backend
            .iter()
            .map(Backend::from_config)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self { backends })
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// The configured primary: index 0 of the catalog.
    pub fn primary(&self) -> Option<&Backend> {
        self.backends.first()
    }

    /// Select the first backend satisfying the request.
    ///
    /// A backend qualifies when it is not excluded, its context window
    /// covers the estimated tokens, it has every required capability, and
    /// its `model_match` patterns accept the request model. Pure: repeated
    /// calls with the same arguments return the same entry.
    pub fn select(
        &self,
        request_model: &str,
        needs: Needs,
        estimated_tokens: u32,
        excluded: &[String],
    ) -> Option<&Backend> {
        self.backends.iter().find(|backend| {
            if excluded.iter().any(|model| model == &backend.model) {
                return false;
            }
            if estimated_tokens > backend.context {
                return false;
            }
            if needs.vision && !backend.vision {
                return false;
            }
            if needs.thinking && !backend.thinking {
                return false;
            }
            backend.matches_model(request_model)
        })
    }

    /// The effective attempt list for a request: the selected backend
    /// first, then the remaining catalog in configured order. Returned by
    /// value so concurrent requests never share mutable selection state.
    pub fn effective_attempts(&self, selected: &Backend) -> Vec<Backend> {
        let mut attempts = Vec::with_capacity(self.backends.len());
        attempts.push(selected.clone());
        attempts.extend(
            self.backends
                .iter()
                .filter(|backend| backend.model != selected.model)
                .cloned(),
        );
        attempts
    }
}
