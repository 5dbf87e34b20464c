//! Wire types for the supported dialects.
//!
//! `anthropic` and `openai` are the two caller-facing request/response
//! shapes; `responses` is the alternate upstream encoding used for model
//! ids starting with `gpt-5`. The internal normalized form is the OpenAI
//! chat-completions shape.

pub(crate) mod anthropic;
pub(crate) mod openai;
pub(crate) mod responses;
