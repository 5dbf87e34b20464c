//! Dialect translation.
//!
//! `from_anthropic` rewrites Messages-API requests into the internal
//! chat-completions form, `to_anthropic` rewrites upstream responses
//! (chat-completions or Responses shaped) back, and `to_responses`
//! re-encodes an outbound body for the Responses API. The max_tokens
//! policy lives here because it applies between translation and shaping.

use config::{MaxTokensLimit, MinTokensLimit};

use crate::messages::openai::ChatCompletionRequest;

pub(crate) mod from_anthropic;
pub(crate) mod to_anthropic;
pub(crate) mod to_responses;

/// Apply the configured `max_tokens` policy to an internal request.
///
/// With an integer limit `M` and floor `m`, an absent caller value
/// defaults to `m` and the result is clamped into `[m, M]`. With no
/// policy configured the bounds are `[100, 4096]`. `"request"` keeps the
/// caller's value and emits nothing when the caller omitted it.
pub fn apply_max_tokens_policy(request: &mut ChatCompletionRequest, max: MaxTokensLimit, min: MinTokensLimit) {
    request.max_tokens = match max {
        MaxTokensLimit::Ignore => None,
        MaxTokensLimit::Request => request.max_tokens,
        MaxTokensLimit::Limit(limit) => {
            let floor = min.floor();
            let lo = floor.min(limit);
            Some(request.max_tokens.unwrap_or(floor).clamp(lo, limit))
        }
        MaxTokensLimit::Unset => Some(request.max_tokens.unwrap_or(100).clamp(100, 4096)),
    };
}
