//! Chat-completions → Responses-API re-encoding.
//!
//! Applied to the outbound body after shaping, when the effective model
//! id begins with `gpt-5`. Works on the JSON tree so shaped-in keys
//! survive: only the fields the Responses API disagrees on are rewritten
//! or removed, everything else is carried.

use serde_json::{Map, Value};

/// Fields the Responses API does not accept.
const UNSUPPORTED_FIELDS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "n",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "user",
    "response_format",
];

/// Re-encode an outbound chat-completions body for the Responses API.
pub fn encode(body: &Value) -> Value {
    let Value::Object(map) = body else {
        return body.clone();
    };

    let mut out = Map::with_capacity(map.len());

    for (key, value) in map {
        match key.as_str() {
            "messages" => {
                out.insert("input".to_string(), Value::String(flatten_messages(value)));
            }
            "tools" => {
                out.insert("tools".to_string(), flatten_tools(value));
            }
            "tool_choice" => {
                out.insert("tool_choice".to_string(), flatten_tool_choice(value));
            }
            key if UNSUPPORTED_FIELDS.contains(&key) => {}
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    Value::Object(out)
}

/// Collapse the messages array into a single `input` string:
/// `"<role>: <text>"` per message, blank-line separated, image blocks
/// dropped, trailing whitespace trimmed.
fn flatten_messages(messages: &Value) -> String {
    let Some(messages) = messages.as_array() else {
        return String::new();
    };

    let mut input = String::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        let text = message_text(message.get("content"));

        input.push_str(role);
        input.push_str(": ");
        input.push_str(&text);
        input.push_str("\n\n");
    }

    input.trim_end().to_string()
}

fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

/// `{type:"function", function:{name, description, parameters}}` becomes
/// the flat `{type:"function", name, description, parameters}`.
fn flatten_tools(tools: &Value) -> Value {
    let Some(tools) = tools.as_array() else {
        return tools.clone();
    };

    Value::Array(
        tools
            .iter()
            .map(|tool| {
                let Some(function) = tool.get("function").and_then(Value::as_object) else {
                    return tool.clone();
                };

                let mut flat = Map::with_capacity(function.len() + 1);
                flat.insert(
                    "type".to_string(),
                    tool.get("type").cloned().unwrap_or_else(|| Value::String("function".into())),
                );
                for (key, value) in function {
                    flat.insert(key.clone(), value.clone());
                }
                Value::Object(flat)
            })
            .collect(),
    )
}

fn flatten_tool_choice(choice: &Value) -> Value {
    let Some(function) = choice.get("function").and_then(Value::as_object) else {
        return choice.clone();
    };

    let mut flat = Map::new();
    flat.insert(
        "type".to_string(),
        choice.get("type").cloned().unwrap_or_else(|| Value::String("function".into())),
    );
    if let Some(name) = function.get("name") {
        flat.insert("name".to_string(), name.clone());
    }
    Value::Object(flat)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::encode;

    #[test]
    fn messages_collapse_to_input() {
        let encoded = encode(&json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [
                    {"type": "text", "text": "describe this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}}
                ]}
            ]
        }));

        assert_eq!(encoded["input"], "system: be brief\n\nuser: describe this");
        assert!(encoded.get("messages").is_none());
    }

    #[test]
    fn unsupported_fields_are_stripped_and_others_kept() {
        let encoded = encode(&json!({
            "model": "gpt-5",
            "messages": [],
            "max_tokens": 512,
            "temperature": 0.7,
            "top_p": 0.9,
            "response_format": {"type": "json_object"},
            "stream": true,
            "custom_added_key": "survives"
        }));

        for gone in ["max_tokens", "temperature", "top_p", "response_format"] {
            assert!(encoded.get(gone).is_none(), "{gone} should be stripped");
        }
        assert_eq!(encoded["stream"], true);
        assert_eq!(encoded["custom_added_key"], "survives");
    }

    #[test]
    fn tools_flatten() {
        let encoded = encode(&json!({
            "messages": [],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "weather lookup",
                    "parameters": {"type": "object"}
                }
            }]
        }));

        assert_eq!(
            encoded["tools"],
            json!([{
                "type": "function",
                "name": "get_weather",
                "description": "weather lookup",
                "parameters": {"type": "object"}
            }])
        );
    }

    #[test]
    fn tool_choice_flattens() {
        let encoded = encode(&json!({
            "messages": [],
            "tool_choice": {"type": "function", "function": {"name": "lookup"}}
        }));

        assert_eq!(encoded["tool_choice"], json!({"type": "function", "name": "lookup"}));
    }

    #[test]
    fn mode_tool_choice_passes_through() {
        let encoded = encode(&json!({"messages": [], "tool_choice": "auto"}));
        assert_eq!(encoded["tool_choice"], "auto");
    }
}
