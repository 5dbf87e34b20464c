//! Upstream response → Anthropic translation.

use serde_json::Value;

use crate::{
    error::LlmError,
    messages::{
        anthropic::{AnthropicChatResponse, AnthropicResponseContent, AnthropicRole, AnthropicStopReason, AnthropicUsage},
        openai::{ChatCompletionResponse, FinishReason},
        responses::{OutputContent, ResponsesResponse},
    },
};

/// Rewrite an upstream response body into the Anthropic response shape.
///
/// Handles both upstream shapes: a chat completion, or a Responses body
/// recognized by `object == "response"`. `request_tool_names` is the
/// tool list of the original request; Responses tool calls naming a tool
/// outside it are dropped with a warning.
pub fn response(
    body: Value,
    request_tool_names: &[String],
    fallback_model: &str,
) -> Result<AnthropicChatResponse, LlmError> {
    if body.get("object").and_then(Value::as_str) == Some("response") {
        let parsed: ResponsesResponse = serde_json::from_value(body)
            .map_err(|e| LlmError::Internal(Some(format!("Unparseable Responses body: {e}"))))?;
        Ok(from_responses(parsed, request_tool_names, fallback_model))
    } else {
        let parsed: ChatCompletionResponse = serde_json::from_value(body)
            .map_err(|e| LlmError::Internal(Some(format!("Unparseable chat completion body: {e}"))))?;
        Ok(from_chat_completion(parsed, fallback_model))
    }
}

fn from_chat_completion(response: ChatCompletionResponse, fallback_model: &str) -> AnthropicChatResponse {
    let mut content = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content {
            content.push(AnthropicResponseContent::Text { text });
        }

        for call in choice.message.tool_calls.into_iter().flatten() {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({ "raw_arguments": call.function.arguments }));

            content.push(AnthropicResponseContent::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        finish_reason = choice.finish_reason;
    }

    if content.is_empty() {
        content.push(AnthropicResponseContent::Text { text: String::new() });
    }

    let stop_reason = match finish_reason {
        Some(FinishReason::Length) => AnthropicStopReason::MaxTokens,
        Some(FinishReason::ToolCalls) | Some(FinishReason::FunctionCall) => AnthropicStopReason::ToolUse,
        _ => AnthropicStopReason::EndTurn,
    };

    let usage = response.usage.unwrap_or_default();

    AnthropicChatResponse {
        id: response.id,
        r#type: "message".to_string(),
        role: AnthropicRole::Assistant,
        content,
        model: response.model.unwrap_or_else(|| fallback_model.to_string()),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

fn from_responses(
    response: ResponsesResponse,
    request_tool_names: &[String],
    fallback_model: &str,
) -> AnthropicChatResponse {
    let mut content = Vec::new();

    for item in response.output {
        if item.r#type != "message" {
            continue;
        }

        for entry in item.content {
            match entry {
                OutputContent::OutputText { text } => {
                    content.push(AnthropicResponseContent::Text { text });
                }
                OutputContent::ToolCall { id, name, arguments } => {
                    if !request_tool_names.iter().any(|known| known == &name) {
                        log::warn!("Dropping tool_call for '{name}': not in the request's tool list");
                        continue;
                    }

                    content.push(AnthropicResponseContent::ToolUse {
                        id: id.unwrap_or_default(),
                        name,
                        input: arguments.unwrap_or_else(|| Value::Object(Default::default())),
                    });
                }
                OutputContent::Unknown(_) => {}
            }
        }
    }

    let has_tool_use = content
        .iter()
        .any(|block| matches!(block, AnthropicResponseContent::ToolUse { .. }));

    if content.is_empty() {
        content.push(AnthropicResponseContent::Text { text: String::new() });
    }

    let usage = response.usage.unwrap_or_default();

    AnthropicChatResponse {
        id: response.id,
        r#type: "message".to_string(),
        role: AnthropicRole::Assistant,
        content,
        model: response.model.unwrap_or_else(|| fallback_model.to_string()),
        stop_reason: Some(if has_tool_use {
            AnthropicStopReason::ToolUse
        } else {
            AnthropicStopReason::EndTurn
        }),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn chat_completion_text_choice() {
        let result = response(
            json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"content": "hello"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 7, "completion_tokens": 2}
            }),
            &[],
            "requested",
        )
        .unwrap();

        assert_eq!(result.id, "chatcmpl-1");
        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.stop_reason, Some(AnthropicStopReason::EndTurn));
        assert_eq!(result.usage.input_tokens, 7);
        assert_eq!(result.usage.output_tokens, 2);
        assert!(matches!(
            &result.content[0],
            AnthropicResponseContent::Text { text } if text == "hello"
        ));
    }

    #[test]
    fn finish_reason_mapping() {
        let stop_reason = |reason: &str| {
            response(
                json!({
                    "id": "x",
                    "choices": [{"message": {"content": "t"}, "finish_reason": reason}]
                }),
                &[],
                "m",
            )
            .unwrap()
            .stop_reason
        };

        assert_eq!(stop_reason("length"), Some(AnthropicStopReason::MaxTokens));
        assert_eq!(stop_reason("tool_calls"), Some(AnthropicStopReason::ToolUse));
        assert_eq!(stop_reason("function_call"), Some(AnthropicStopReason::ToolUse));
        assert_eq!(stop_reason("stop"), Some(AnthropicStopReason::EndTurn));
        assert_eq!(stop_reason("content_filter"), Some(AnthropicStopReason::EndTurn));
    }

    #[test]
    fn tool_calls_parse_arguments_or_wrap_raw() {
        let result = response(
            json!({
                "id": "x",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [
                            {"id": "c1", "type": "function",
                             "function": {"name": "ok", "arguments": "{\"a\":1}"}},
                            {"id": "c2", "type": "function",
                             "function": {"name": "broken", "arguments": "not json"}}
                        ]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
            &[],
            "m",
        )
        .unwrap();

        let AnthropicResponseContent::ToolUse { input, .. } = &result.content[0] else {
            unreachable!("first block should be tool_use");
        };
        assert_eq!(input, &json!({"a": 1}));

        let AnthropicResponseContent::ToolUse { input, .. } = &result.content[1] else {
            unreachable!("second block should be tool_use");
        };
        assert_eq!(input, &json!({"raw_arguments": "not json"}));
    }

    #[test]
    fn empty_choice_yields_one_empty_text_block() {
        let result = response(
            json!({"id": "x", "choices": [{"message": {"content": null}}]}),
            &[],
            "m",
        )
        .unwrap();

        assert_eq!(result.content.len(), 1);
        assert!(matches!(
            &result.content[0],
            AnthropicResponseContent::Text { text } if text.is_empty()
        ));
        assert_eq!(result.stop_reason, Some(AnthropicStopReason::EndTurn));
    }

    #[test]
    fn responses_shape_with_known_and_unknown_tools() {
        let result = response(
            json!({
                "id": "resp_1",
                "object": "response",
                "output": [{
                    "type": "message",
                    "content": [
                        {"type": "output_text", "text": "looking that up"},
                        {"type": "tool_call", "id": "tc1", "name": "known", "arguments": {"q": 1}},
                        {"type": "tool_call", "id": "tc2", "name": "unknown_tool", "arguments": {}}
                    ]
                }],
                "usage": {"input_tokens": 4, "output_tokens": 6}
            }),
            &["known".to_string()],
            "m",
        )
        .unwrap();

        assert_eq!(result.content.len(), 2);
        assert!(matches!(result.content[0], AnthropicResponseContent::Text { .. }));
        assert!(matches!(
            &result.content[1],
            AnthropicResponseContent::ToolUse { name, .. } if name == "known"
        ));
        assert_eq!(result.stop_reason, Some(AnthropicStopReason::ToolUse));
        assert_eq!(result.usage.input_tokens, 4);
    }

    #[test]
    fn responses_without_tool_use_ends_turn() {
        let result = response(
            json!({
                "id": "resp_2",
                "object": "response",
                "output": [{
                    "type": "message",
                    "content": [{"type": "output_text", "text": "plain"}]
                }]
            }),
            &[],
            "m",
        )
        .unwrap();

        assert_eq!(result.stop_reason, Some(AnthropicStopReason::EndTurn));
    }

    #[test]
    fn unparseable_body_is_an_internal_error() {
        let error = response(json!({"choices": "nope"}), &[], "m").unwrap_err();
        assert!(matches!(error, LlmError::Internal(Some(_))));
    }
}
