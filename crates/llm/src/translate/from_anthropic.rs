//! Anthropic → internal request translation.

use serde_json::Value;

use crate::messages::{
    anthropic::{
        AnthropicChatRequest, AnthropicContent, AnthropicContentContainer, AnthropicMessage, AnthropicRole,
        AnthropicToolChoice,
    },
    openai::{
        ChatCompletionRequest, ChatContent, ChatMessage, ChatRole, ContentBlock, FunctionCall, FunctionDefinition,
        ImageUrl, Tool, ToolCall, ToolChoice, ToolChoiceFunction, ToolType,
    },
};

/// Rewrite a Messages-API request into the internal chat-completions
/// form, preserving message order.
///
/// The system prompt becomes a leading system message. Assistant
/// tool_use blocks become tool_calls, and a user message of tool_result
/// blocks directly following an assistant message is consumed into
/// tool-role messages. `max_tokens` is carried as-is; the configured
/// policy is applied afterwards.
pub fn chat_request(request: AnthropicChatRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        let joined = system.joined();
        if !joined.trim().is_empty() {
            messages.push(ChatMessage {
                role: ChatRole::System,
                content: Some(ChatContent::Text(joined)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    let mut input = request.messages.into_iter().peekable();

    while let Some(message) = input.next() {
        match message.role {
            AnthropicRole::User => messages.push(user_message(message)),
            AnthropicRole::Assistant => {
                messages.push(assistant_message(message));

                // A user message made of tool_result blocks directly after
                // an assistant turn carries the results for its tool calls.
                if input.peek().is_some_and(is_tool_result_carrier) {
                    let carrier = input.next().expect("peeked message is present");
                    append_tool_results(carrier, &mut messages);
                }
            }
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .filter(|tool| !tool.name.is_empty())
            .map(|tool| Tool {
                r#type: ToolType::Function,
                function: FunctionDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
            })
            .collect()
    });

    let tool_choice = request.tool_choice.map(|choice| match choice {
        AnthropicToolChoice::Auto | AnthropicToolChoice::Any => ToolChoice::Mode("auto".to_string()),
        AnthropicToolChoice::Tool { name } => ToolChoice::Specific {
            r#type: ToolType::Function,
            function: ToolChoiceFunction { name },
        },
        AnthropicToolChoice::Unknown(_) => ToolChoice::Mode("auto".to_string()),
    });

    ChatCompletionRequest {
        model: request.model,
        messages,
        temperature: Some(request.temperature.unwrap_or(1.0)),
        top_p: request.top_p,
        stop: request.stop_sequences,
        max_tokens: request.max_tokens,
        stream: request.stream,
        stream_options: None,
        tools,
        tool_choice,
    }
}

fn user_message(message: AnthropicMessage) -> ChatMessage {
    let content = match message.content {
        AnthropicContentContainer::Text(text) => Some(ChatContent::Text(text)),
        AnthropicContentContainer::Blocks(blocks) => {
            let mut converted = Vec::with_capacity(blocks.len());

            for block in blocks {
                match block {
                    AnthropicContent::Text { text } => converted.push(ContentBlock::Text { text }),
                    AnthropicContent::Image { source } => {
                        if source.source_type == "base64" {
                            let media = source.media_type.unwrap_or_default();
                            let data = source.data.unwrap_or_default();
                            converted.push(ContentBlock::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!("data:{media};base64,{data}"),
                                },
                            });
                        }
                    }
                    // tool_result blocks are consumed by the assistant
                    // lookahead; anything else has no counterpart here.
                    _ => {}
                }
            }

            // A lone text block flattens to a plain string.
            if converted.len() == 1
                && let ContentBlock::Text { text } = &converted[0]
            {
                Some(ChatContent::Text(text.clone()))
            } else {
                Some(ChatContent::Blocks(converted))
            }
        }
    };

    ChatMessage {
        role: ChatRole::User,
        content,
        tool_calls: None,
        tool_call_id: None,
    }
}

fn assistant_message(message: AnthropicMessage) -> ChatMessage {
    let (text, tool_calls) = match message.content {
        AnthropicContentContainer::Text(text) => (text, Vec::new()),
        AnthropicContentContainer::Blocks(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block {
                    AnthropicContent::Text { text: t } => text.push_str(&t),
                    AnthropicContent::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                        id,
                        r#type: ToolType::Function,
                        function: FunctionCall {
                            name,
                            arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                        },
                    }),
                    _ => {}
                }
            }

            (text, tool_calls)
        }
    };

    ChatMessage {
        role: ChatRole::Assistant,
        content: if text.is_empty() { None } else { Some(ChatContent::Text(text)) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn is_tool_result_carrier(message: &AnthropicMessage) -> bool {
    if message.role != AnthropicRole::User {
        return false;
    }

    match &message.content {
        AnthropicContentContainer::Blocks(blocks) => blocks
            .iter()
            .any(|block| matches!(block, AnthropicContent::ToolResult { .. })),
        AnthropicContentContainer::Text(_) => false,
    }
}

fn append_tool_results(message: AnthropicMessage, messages: &mut Vec<ChatMessage>) {
    let AnthropicContentContainer::Blocks(blocks) = message.content else {
        return;
    };

    for block in blocks {
        if let AnthropicContent::ToolResult { tool_use_id, content } = block {
            messages.push(ChatMessage {
                role: ChatRole::Tool,
                content: Some(ChatContent::Text(stringify_tool_result(content))),
                tool_calls: None,
                tool_call_id: Some(tool_use_id),
            });
        }
    }
}

/// Flatten a tool_result payload to a string: strings pass through, text
/// blocks are joined, anything else is JSON-encoded.
fn stringify_tool_result(content: Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(text)) => text,
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        Some(object) => {
            if object.get("type").and_then(Value::as_str) == Some("text")
                && let Some(text) = object.get("text").and_then(Value::as_str)
            {
                return text.to_string();
            }
            serde_json::to_string(&object).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::openai::{ChatContent, ChatRole};

    fn parse(body: serde_json::Value) -> ChatCompletionRequest {
        let request: AnthropicChatRequest = serde_json::from_value(body).unwrap();
        chat_request(request)
    }

    #[test]
    fn system_is_prepended_and_joined() {
        let internal = parse(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 1024,
            "system": [
                {"type": "text", "text": "be brief"},
                {"type": "text", "text": "be kind"}
            ],
            "messages": [{"role": "user", "content": "hello"}]
        }));

        assert_eq!(internal.messages.len(), 2);
        assert_eq!(internal.messages[0].role, ChatRole::System);
        let Some(ChatContent::Text(text)) = &internal.messages[0].content else {
            unreachable!("system content should be text");
        };
        assert_eq!(text, "be brief\n\nbe kind");
    }

    #[test]
    fn blank_system_is_dropped() {
        let internal = parse(json!({
            "model": "m",
            "system": "   ",
            "messages": [{"role": "user", "content": "hello"}]
        }));

        assert_eq!(internal.messages.len(), 1);
        assert_eq!(internal.messages[0].role, ChatRole::User);
    }

    #[test]
    fn single_text_block_flattens_to_string() {
        let internal = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
        }));

        assert!(matches!(
            &internal.messages[0].content,
            Some(ChatContent::Text(text)) if text == "hi"
        ));
    }

    #[test]
    fn base64_images_become_data_urls() {
        let internal = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image", "source": {
                    "type": "base64", "media_type": "image/jpeg", "data": "AAAA"
                }}
            ]}]
        }));

        let Some(ChatContent::Blocks(blocks)) = &internal.messages[0].content else {
            unreachable!("content should stay blocks");
        };
        let ContentBlock::ImageUrl { image_url } = &blocks[1] else {
            unreachable!("second block should be the image");
        };
        assert_eq!(image_url.url, "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let internal = parse(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "weather in paris?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                     "input": {"city": "Paris"}}
                ]}
            ]
        }));

        let assistant = &internal.messages[1];
        assert!(assistant.content.is_none());
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
    }

    #[test]
    fn assistant_text_blocks_join_without_separator() {
        let internal = parse(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "text", "text": " there"}
                ]}
            ]
        }));

        assert!(matches!(
            &internal.messages[1].content,
            Some(ChatContent::Text(text)) if text == "Hello there"
        ));
    }

    #[test]
    fn tool_results_after_assistant_become_tool_messages() {
        let internal = parse(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1",
                     "content": [{"type": "text", "text": "sunny"}, {"type": "text", "text": "21C"}]}
                ]},
                {"role": "user", "content": "thanks"}
            ]
        }));

        assert_eq!(internal.messages.len(), 3);
        let tool = &internal.messages[1];
        assert_eq!(tool.role, ChatRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("toolu_1"));
        assert!(matches!(
            &tool.content,
            Some(ChatContent::Text(text)) if text == "sunny\n21C"
        ));
        assert_eq!(internal.messages[2].role, ChatRole::User);
    }

    #[test]
    fn tool_result_stringification_forms() {
        assert_eq!(stringify_tool_result(Some(json!("plain"))), "plain");
        assert_eq!(
            stringify_tool_result(Some(json!({"type": "text", "text": "from object"}))),
            "from object"
        );
        assert_eq!(
            stringify_tool_result(Some(json!({"answer": 42}))),
            r#"{"answer":42}"#
        );
        assert_eq!(stringify_tool_result(None), "");
    }

    #[test]
    fn tools_map_and_empty_names_are_skipped() {
        let internal = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "get_weather", "description": "weather lookup",
                 "input_schema": {"type": "object"}},
                {"name": "", "input_schema": {}}
            ],
            "tool_choice": {"type": "tool", "name": "get_weather"}
        }));

        let tools = internal.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "get_weather");
        assert_eq!(tools[0].function.parameters, json!({"type": "object"}));

        assert!(matches!(
            internal.tool_choice,
            Some(ToolChoice::Specific { ref function, .. }) if function.name == "get_weather"
        ));
    }

    #[test]
    fn tool_choice_any_and_unknown_become_auto() {
        let any = parse(json!({
            "model": "m",
            "messages": [],
            "tool_choice": {"type": "any"}
        }));
        assert!(matches!(any.tool_choice, Some(ToolChoice::Mode(ref mode)) if mode == "auto"));

        let odd = parse(json!({
            "model": "m",
            "messages": [],
            "tool_choice": {"type": "brand_new"}
        }));
        assert!(matches!(odd.tool_choice, Some(ToolChoice::Mode(ref mode)) if mode == "auto"));
    }

    #[test]
    fn sampling_fields_carry_over_with_temperature_default() {
        let internal = parse(json!({
            "model": "m",
            "max_tokens": 512,
            "top_p": 0.9,
            "stop_sequences": ["END"],
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        assert_eq!(internal.temperature, Some(1.0));
        assert_eq!(internal.top_p, Some(0.9));
        assert_eq!(internal.stop.as_deref(), Some(&["END".to_string()][..]));
        assert_eq!(internal.max_tokens, Some(512));
        assert_eq!(internal.stream, Some(true));
    }
}
