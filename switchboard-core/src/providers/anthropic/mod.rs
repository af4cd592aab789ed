//! Anthropic-protocol adapter
//!
//! Speaks the Messages API: system prompts travel outside the message
//! list, responses arrive as content blocks, and streams interleave text,
//! thinking, and usage deltas.

mod client;
pub mod types;

pub use client::{AnthropicProvider, ANTHROPIC_API_URL};
