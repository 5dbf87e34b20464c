//! Token-shaping limit sentinels.
//!
//! Both limits accept either a string sentinel or a positive integer in
//! the configuration file, so they carry hand-written `Deserialize`
//! implementations instead of a derived enum.

use std::fmt;

use serde::{Deserialize, Deserializer, de};

/// Policy for the outbound `max_tokens` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokensLimit {
    /// Never emit `max_tokens`.
    Ignore,
    /// Emit the caller's value when present, nothing otherwise.
    Request,
    /// Clamp to `[min_tokens_limit, N]`, defaulting an absent caller
    /// value to the lower bound.
    Limit(u32),
    /// No policy configured: clamp to `[100, 4096]` with an absent
    /// caller value defaulting to 100.
    Unset,
}

impl Default for MaxTokensLimit {
    fn default() -> Self {
        Self::Unset
    }
}

/// Lower clamp bound applied when `max_tokens_limit` is an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinTokensLimit {
    /// No lower bound (treated as zero).
    Ignore,
    /// Explicit lower bound.
    Limit(u32),
}

impl Default for MinTokensLimit {
    fn default() -> Self {
        Self::Limit(100)
    }
}

impl MinTokensLimit {
    /// The effective lower bound in tokens.
    pub fn floor(&self) -> u32 {
        match self {
            Self::Ignore => 0,
            Self::Limit(n) => *n,
        }
    }
}

struct MaxTokensLimitVisitor;

impl de::Visitor<'_> for MaxTokensLimitVisitor {
    type Value = MaxTokensLimit;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(r#""ignore", "request", or a positive integer"#)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        match value {
            "ignore" => Ok(MaxTokensLimit::Ignore),
            "request" => Ok(MaxTokensLimit::Request),
            // Anything else falls back to the default clamp policy.
            _ => Ok(MaxTokensLimit::Unset),
        }
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        if value <= 0 {
            return Err(E::custom("max_tokens_limit must be a positive integer"));
        }
        Ok(MaxTokensLimit::Limit(value as u32))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        if value == 0 || value > u64::from(u32::MAX) {
            return Err(E::custom("max_tokens_limit must be a positive integer"));
        }
        Ok(MaxTokensLimit::Limit(value as u32))
    }
}

impl<'de> Deserialize<'de> for MaxTokensLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MaxTokensLimitVisitor)
    }
}

struct MinTokensLimitVisitor;

impl de::Visitor<'_> for MinTokensLimitVisitor {
    type Value = MinTokensLimit;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(r#""ignore" or a positive integer"#)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        match value {
            "ignore" => Ok(MinTokensLimit::Ignore),
            other => Err(E::custom(format!(
                r#"min_tokens_limit must be "ignore" or a positive integer, got "{other}""#
            ))),
        }
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        if value <= 0 {
            return Err(E::custom("min_tokens_limit must be a positive integer"));
        }
        Ok(MinTokensLimit::Limit(value as u32))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        if value == 0 || value > u64::from(u32::MAX) {
            return Err(E::custom("min_tokens_limit must be a positive integer"));
        }
        Ok(MinTokensLimit::Limit(value as u32))
    }
}

impl<'de> Deserialize<'de> for MinTokensLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MinTokensLimitVisitor)
    }
}
