//! Provider abstraction layer
//!
//! One uniform capability contract over heterogeneous LLM backends. Each
//! backend gets an adapter that speaks its wire protocol and raises the
//! shared error taxonomy; the registry owns adapter instances by name.

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod rate_limit;
pub mod registry;
pub mod sse;

pub use error::{ProviderError, ProviderResult};
pub use rate_limit::{RateLimitInfo, RateLimitTracker};
pub use registry::{Registry, RegistryError};

use crate::protocol::{ChatRequest, ModelInfo, Response, StreamEvent, StreamRequest};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default retry budget recorded in the config for callers that wrap the
/// provider in a retry orchestrator.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Events delivered by a streaming call, in order, terminated by exactly
/// one `MessageStop` or `Error` event. Dropping the receiver stops the
/// producing task.
pub type EventStream = mpsc::Receiver<StreamEvent>;

/// Construction-time configuration for a provider instance.
///
/// Supplied by the configuration subsystem; this crate only validates the
/// pieces it depends on.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key, required and non-empty
    pub api_key: String,

    /// Override for the backend's default endpoint
    pub base_url: Option<String>,

    /// Organization/tenant identifier, when the backend supports one
    pub organization: Option<String>,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retry budget advertised to recovery wrappers
    pub retry_attempts: u32,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            organization: None,
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// A missing API key is a construction-time failure, not a runtime one.
    pub fn validate(&self, provider: &str) -> ProviderResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::authentication(provider, "API key is required"));
        }
        Ok(())
    }
}

/// The uniform capability contract every backend adapter implements.
///
/// Adapters never retry internally; recovery is an explicit wrapper the
/// caller applies, so a single `chat` call is always at most one request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The adapter's name ("openai", "anthropic", ...).
    fn name(&self) -> &str;

    /// Send a chat request and wait for the complete response.
    ///
    /// Cancellation is dropping the returned future; no work survives it.
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<Response>;

    /// Send a streaming chat request.
    ///
    /// Returns an error only when the initial request fails; once the
    /// stream is open, failures arrive as a terminal `Error` event.
    /// Cancelling `cancel` mid-stream yields a terminal `Error` event
    /// carrying the cancellation cause and stops the producing task.
    async fn stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<EventStream>;

    /// The models this provider can serve, in preference order.
    async fn models(&self) -> ProviderResult<Vec<ModelInfo>>;

    /// Release connection resources. Must not panic after successful
    /// construction.
    async fn close(&self) -> ProviderResult<()>;
}
