//! Wire types for the Anthropic Messages protocol

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,

    pub stop_reason: Option<String>,

    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,
}

/// Payload of a `message_start` stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartPayload {
    #[serde(default)]
    pub message: MessageStartInner,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageStartInner {
    pub usage: Option<AnthropicUsage>,
}

/// Payload of a `content_block_delta` stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaPayload {
    pub delta: ContentDelta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentDelta {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub thinking: String,
}

/// Payload of a `message_delta` stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaPayload {
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorBody {
    pub error: AnthropicErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub message: String,
}
