//! Responses API response-body wire types.
//!
//! The alternate upstream API used when the effective model id begins
//! with `gpt-5`. Only the response side is typed here; the outbound
//! re-encoding (messages collapsed to `input`, flat tool definitions,
//! unsupported sampling fields stripped) happens on the shaped JSON
//! tree in the translate module, so shaped-in keys survive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of a buffered Responses API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    #[serde(default)]
    pub id: String,

    /// Always `"response"`; used to distinguish the shape from a chat
    /// completion when parsing upstream bodies.
    pub object: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub output: Vec<OutputItem>,

    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputItem {
    pub r#type: String,

    #[serde(default)]
    pub content: Vec<OutputContent>,
}

/// Content entries inside a Responses output message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        text: String,
    },

    ToolCall {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
    },

    /// Annotations, refusals and whatever else the API grows.
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}
