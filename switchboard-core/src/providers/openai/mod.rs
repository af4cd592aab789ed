//! OpenAI-protocol adapter
//!
//! Speaks the chat-completions wire format used by OpenAI and the many
//! OpenAI-compatible backends.

mod client;
pub mod types;

pub use client::{OpenAIProvider, OPENAI_API_URL};
