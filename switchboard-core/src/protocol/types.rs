//! The uniform request/response/streaming data model
//!
//! These are the types every backend adapter speaks, regardless of its wire
//! protocol. Requests are built by the caller (optionally through the
//! chainable `with_*` methods) and never mutated after being handed to a
//! provider; responses and events are produced by adapters and immutable.

use crate::providers::error::ProviderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions that guide the model's behavior
    System,
    /// User input message
    User,
    /// Assistant (model) response
    Assistant,
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Text content of the message
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    /// Model identifier to use
    #[serde(default)]
    pub model: String,

    /// Messages in the conversation, oldest first
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Sequences that stop generation
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop_sequences: Vec<String>,

    /// Caller-supplied metadata, passed through untouched
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A streaming request carries exactly the same parameters as a chat
/// request; the invoked operation decides how the result is delivered.
pub type StreamRequest = ChatRequest;

impl ChatRequest {
    /// Create a new chat request with model and messages
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top_p for nucleus sampling
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Add a stop sequence
    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Token usage reported by a backend.
///
/// Adapters set `total_tokens` explicitly from what the backend reports
/// (or its documented sum); it is never derived after the fact, since some
/// backends report only totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsageInfo {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,
}

/// A complete (non-streaming) chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Generated text
    pub content: String,

    /// Model that produced the response (as reported by the backend)
    pub model: String,

    /// Name of the provider that served the call
    pub provider: String,

    /// Why generation stopped ("stop", "length", "end_turn", ...)
    pub finish_reason: String,

    /// Token usage, when the backend reported it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,

    /// Provider-specific metadata
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the response was received
    pub created_at: DateTime<Utc>,
}

/// Read-only catalog entry describing a model a provider can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier as used on the wire
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Provider that serves this model
    pub provider: String,

    /// Maximum context window in tokens
    pub max_tokens: u32,

    /// Capability tags ("chat", "streaming", "thinking", ...)
    pub capabilities: Vec<String>,
}

/// Kind of an incremental streaming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageStart,
    ContentStart,
    TextDelta,
    ContentEnd,
    MessageStop,
    Usage,
    Thinking,
    Error,
}

impl EventType {
    /// Whether an event of this type ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop | Self::Error)
    }
}

/// One event in a streaming response.
///
/// The sequence for a single stream is ordered and terminates in exactly
/// one `MessageStop` or `Error` event.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// What kind of event this is
    pub event_type: EventType,

    /// Text payload: the delta for `TextDelta`/`Thinking`, the accumulated
    /// text for `ContentEnd`/`MessageStop`, empty otherwise
    pub content: String,

    /// Usage attached to `Usage` events
    pub usage: Option<UsageInfo>,

    /// The failure carried by an `Error` event
    pub error: Option<ProviderError>,

    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            content: String::new(),
            usage: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A stream-opening event.
    pub fn message_start() -> Self {
        Self::new(EventType::MessageStart)
    }

    /// A content-block-opening event.
    pub fn content_start() -> Self {
        Self::new(EventType::ContentStart)
    }

    /// An incremental text fragment.
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self {
            content: delta.into(),
            ..Self::new(EventType::TextDelta)
        }
    }

    /// An incremental thinking/reasoning fragment.
    pub fn thinking(delta: impl Into<String>) -> Self {
        Self {
            content: delta.into(),
            ..Self::new(EventType::Thinking)
        }
    }

    /// A content block ended; carries the text accumulated so far.
    pub fn content_end(accumulated: impl Into<String>) -> Self {
        Self {
            content: accumulated.into(),
            ..Self::new(EventType::ContentEnd)
        }
    }

    /// The terminal success event; carries the full accumulated text.
    pub fn message_stop(accumulated: impl Into<String>) -> Self {
        Self {
            content: accumulated.into(),
            ..Self::new(EventType::MessageStop)
        }
    }

    /// A usage report observed mid-stream or at the end of one.
    pub fn usage(usage: UsageInfo) -> Self {
        Self {
            usage: Some(usage),
            ..Self::new(EventType::Usage)
        }
    }

    /// The terminal failure event.
    pub fn error(error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(EventType::Error)
        }
    }
}
