//! Switchboard Core Library
//!
//! One uniform request/response/streaming contract over heterogeneous LLM
//! backends, plus the error classification and recovery layer that keeps
//! callers alive when a backend misbehaves.
//!
//! The pieces compose explicitly: the [`providers::Registry`] owns named
//! [`providers::Provider`] instances; each adapter normalizes its
//! backend's wire protocol into the shared [`protocol`] types and raises
//! [`providers::ProviderError`] values; callers opt into [`recovery`]
//! wrappers (retry, circuit breaker, fallback) around provider calls,
//! since providers themselves never retry.

pub mod error;
pub mod protocol;
pub mod providers;
pub mod recovery;

pub use error::{ErrorCode, Severity};
pub use protocol::{
    ChatRequest, EventType, Message, ModelInfo, Response, Role, StreamEvent, StreamRequest,
    UsageInfo,
};
pub use providers::{
    EventStream, Provider, ProviderConfig, ProviderError, ProviderResult, Registry, RegistryError,
};

/// Returns the version of the library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
