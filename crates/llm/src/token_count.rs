//! Request token estimation.
//!
//! Counts input tokens over the text sources of a request (system prompt
//! and message contents) with a BPE encoder, adds a fixed cost per image
//! block and a per-message framing overhead. The estimator understands
//! both dialects' block vocabularies so selection gating and the
//! count_tokens endpoint share one code path.

use std::sync::OnceLock;

use serde_json::Value;
use tiktoken_rs::CoreBPE;

/// Fixed token cost charged for every image content block.
const IMAGE_TOKENS: u32 = 85;

/// Per-message overhead for role and framing tokens.
const MESSAGE_OVERHEAD: u32 = 4;

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

    ENCODER
        .get_or_init(|| match tiktoken_rs::o200k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                log::warn!("BPE encoder unavailable, falling back to character heuristic: {e}");
                None
            }
        })
        .as_ref()
}

/// Estimate the input token count of a request body.
///
/// Works over the raw JSON tree of either dialect: the top-level `system`
/// (string or text-block array) plus each entry of `messages`, where
/// content is a string or a block array with `text`, `image` and
/// `image_url` blocks.
pub fn estimate(body: &Value) -> u32 {
    let mut texts: Vec<&str> = Vec::new();
    let mut images = 0u32;
    let mut message_count = 0u32;

    collect_system(body.get("system"), &mut texts);

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            message_count += 1;
            collect_content(message.get("content"), &mut texts, &mut images);
        }
    }

    let text_tokens = match encoder() {
        Some(bpe) => texts.iter().map(|text| bpe.encode_ordinary(text).len() as u32).sum(),
        None => {
            let total_chars: usize = texts.iter().map(|text| text.chars().count()).sum();
            ((total_chars / 4) as u32).max(1)
        }
    };

    text_tokens + images * IMAGE_TOKENS + message_count * MESSAGE_OVERHEAD
}

fn collect_system<'a>(system: Option<&'a Value>, texts: &mut Vec<&'a str>) {
    match system {
        Some(Value::String(text)) => texts.push(text),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text);
                }
            }
        }
        _ => {}
    }
}

fn collect_content<'a>(content: Option<&'a Value>, texts: &mut Vec<&'a str>, images: &mut u32) {
    match content {
        Some(Value::String(text)) => texts.push(text),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text);
                        }
                    }
                    Some("image") | Some("image_url") => *images += 1,
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_request_counts_nothing() {
        assert_eq!(estimate(&json!({})), 0);
    }

    #[test]
    fn message_overhead_is_four_each() {
        let without_text = estimate(&json!({
            "messages": [
                {"role": "user", "content": []},
                {"role": "assistant", "content": []}
            ]
        }));
        assert_eq!(without_text, 2 * MESSAGE_OVERHEAD);
    }

    #[test]
    fn images_cost_85_in_both_vocabularies() {
        let anthropic = estimate(&json!({
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}}
            ]}]
        }));
        let openai = estimate(&json!({
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}}
            ]}]
        }));

        assert_eq!(anthropic, IMAGE_TOKENS + MESSAGE_OVERHEAD);
        assert_eq!(openai, anthropic);
    }

    #[test]
    fn system_string_and_blocks_are_counted() {
        let as_string = estimate(&json!({"system": "you are a proxy", "messages": []}));
        let as_blocks = estimate(&json!({
            "system": [{"type": "text", "text": "you are a proxy"}],
            "messages": []
        }));

        assert!(as_string > 0);
        assert_eq!(as_string, as_blocks);
    }

    #[test]
    fn text_grows_the_estimate() {
        let short = estimate(&json!({
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let long = estimate(&json!({
            "messages": [{"role": "user", "content": "a considerably longer message with many more words in it"}]
        }));

        assert!(long > short);
    }
}
