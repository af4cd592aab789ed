//! Core protocol types for LLM interactions

pub mod types;

pub use types::{
    ChatRequest, EventType, Message, ModelInfo, Response, Role, StreamEvent, StreamRequest,
    UsageInfo,
};
