use std::{fmt::Write, path::Path, sync::OnceLock};

use anyhow::bail;
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read configuration file {}: {e}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_env_references(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static pattern compiles")
    })
}

/// Replaces `{{ env.NAME }}` references in every string value of the raw
/// TOML tree before deserialization. A reference to an unset variable is
/// a load error pointing at the offending path.
fn expand_env_references<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if !env_pattern().is_match(s) {
                return Ok(());
            }

            let mut expanded = String::with_capacity(s.len());
            let mut last = 0;

            for captures in env_pattern().captures_iter(s) {
                let whole = captures.get(0).expect("capture 0 always present");
                let name = &captures[1];

                expanded.push_str(&s[last..whole.start()]);

                match std::env::var(name) {
                    Ok(var) => expanded.push_str(&var),
                    Err(_) => {
                        bail!(
                            "Failed to expand '{{{{ env.{name} }}}}' at path '{}': environment variable not set",
                            render_path(path)
                        );
                    }
                }

                last = whole.end();
            }

            expanded.push_str(&s[last..]);
            *s = expanded;
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_references(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_references(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn render_path(path: &[Result<&str, usize>]) -> String {
    let mut rendered = String::new();

    for segment in path {
        match segment {
            Ok(s) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(s);
            }
            Err(i) => write!(rendered, "[{i}]").expect("writing to a String cannot fail"),
        }
    }

    rendered
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.port == 0 {
        bail!("port must be non-zero");
    }

    if config.https_enabled && (config.ssl_key_file.is_none() || config.ssl_cert_file.is_none()) {
        bail!("https_enabled requires both ssl_key_file and ssl_cert_file");
    }

    if config.backend.is_empty() {
        bail!(indoc! {r#"
            No backends configured. Patchbay requires at least one [[backend]] entry to route to.

            Example configuration:

              [provider.openai]
              api_key = "{{ env.OPENAI_API_KEY }}"
              base_url = "https://api.openai.com/v1"

              [[backend]]
              model = "openai:gpt-4o"
        "#});
    }

    for (index, backend) in config.backend.iter().enumerate() {
        let Some(provider_token) = backend.provider_token() else {
            bail!(
                "backend[{index}] model '{}' is missing the provider prefix; expected '<provider>:<model-id>'",
                backend.model
            );
        };

        if backend.model_id().is_none_or(str::is_empty) {
            bail!(
                "backend[{index}] model '{}' has an empty model id after the provider prefix",
                backend.model
            );
        }

        if !config.provider.contains_key(provider_token) {
            bail!(
                "backend[{index}] references provider '{provider_token}' but no [provider.{provider_token}] table is configured"
            );
        }

        if backend.has_rate_limit_fields() {
            log::warn!(
                "backend '{}' sets max_per_day/max_per_hour/max_per_5h; these budgets are accepted but not enforced",
                backend.model
            );
        }
    }

    if config.tokens.is_empty() {
        log::warn!("[tokens] is empty; caller authentication is disabled");
    }

    Ok(())
}
