//! Provider error types and classification
//!
//! The single source of truth for "is this worth retrying". Every backend
//! failure is mapped into one of these variants with enough structured
//! context (provider, model, status-derived fields) that callers never
//! parse free text to decide what to do next.

use crate::error::{ErrorCode, Severity};
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by LLM provider adapters.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The backend rejected our credentials (401/403).
    #[error("authentication failed for provider {provider:?}: {reason}")]
    Authentication { provider: String, reason: String },

    /// The backend throttled us (429). `retry_after` is the backend's
    /// hint; `Duration::ZERO` means it did not supply one.
    #[error("rate limit exceeded for provider {provider:?}: retry after {retry_after:?}")]
    RateLimit {
        provider: String,
        retry_after: Duration,
    },

    /// The request exceeded the model's context window. Zero for
    /// `limit`/`requested` means the backend did not report the figure.
    #[error("context length exceeded for provider {provider:?} model {model:?}: {requested} tokens over limit {limit}")]
    ContextLength {
        provider: String,
        model: String,
        limit: u32,
        requested: u32,
    },

    /// The requested model is not in the provider's supported set.
    #[error("invalid model {model:?} for provider {provider:?}: supported models are {supported:?}")]
    InvalidModel {
        provider: String,
        model: String,
        supported: Vec<String>,
    },

    /// Any other backend failure, carrying the backend's error type (as a
    /// classified code) and message.
    #[error("provider {provider:?} error [{code}]: {message}")]
    Generic {
        provider: String,
        model: String,
        code: ErrorCode,
        message: String,
    },
}

impl ProviderError {
    /// Authentication failure.
    pub fn authentication(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Rate limit hit, with the backend's retry hint (ZERO = unknown).
    pub fn rate_limit(provider: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimit {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Context window exceeded.
    pub fn context_length(
        provider: impl Into<String>,
        model: impl Into<String>,
        limit: u32,
        requested: u32,
    ) -> Self {
        Self::ContextLength {
            provider: provider.into(),
            model: model.into(),
            limit,
            requested,
        }
    }

    /// Unknown or unsupported model.
    pub fn invalid_model(
        provider: impl Into<String>,
        model: impl Into<String>,
        supported: Vec<String>,
    ) -> Self {
        Self::InvalidModel {
            provider: provider.into(),
            model: model.into(),
            supported,
        }
    }

    /// A generic provider failure with an explicit code.
    pub fn generic(
        provider: impl Into<String>,
        model: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Generic {
            provider: provider.into(),
            model: model.into(),
            code,
            message: message.into(),
        }
    }

    /// The backend (or the path to it) is unavailable.
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::generic(provider, "", ErrorCode::ProviderUnavailable, message)
    }

    /// The backend returned something we could not parse.
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::generic(provider, "", ErrorCode::ProviderInvalidResponse, message)
    }

    /// The caller cancelled an in-flight call.
    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::generic(
            provider,
            "",
            ErrorCode::RequestCancelled,
            "request cancelled by caller",
        )
    }

    /// Map a transport-level failure.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::generic(provider, "", ErrorCode::ProviderTimeout, err.to_string())
        } else if err.is_connect() {
            Self::unavailable(provider, format!("connection failed: {err}"))
        } else {
            Self::unavailable(provider, err.to_string())
        }
    }

    /// Status-code-only classification, used when the error body is absent
    /// or unparseable. Adapters refine this with body fields first.
    pub fn from_status(
        provider: &str,
        model: &str,
        status: u16,
        retry_after: Duration,
        body: &str,
    ) -> Self {
        match status {
            401 | 403 => Self::authentication(provider, body),
            429 => Self::rate_limit(provider, retry_after),
            404 => Self::generic(
                provider,
                model,
                ErrorCode::ProviderNotFound,
                format!("not found: {body}"),
            ),
            408 | 504 => Self::generic(provider, model, ErrorCode::ProviderTimeout, body),
            500..=599 => Self::generic(
                provider,
                model,
                ErrorCode::ProviderUnavailable,
                format!("HTTP {status}: {body}"),
            ),
            _ => Self::generic(
                provider,
                model,
                ErrorCode::ProviderInvalidResponse,
                format!("HTTP {status}: {body}"),
            ),
        }
    }

    /// Whether re-attempting the same call is safe and useful.
    ///
    /// This is a pure function of the variant: rate limits are transient,
    /// everything else either needs caller action (credentials, input
    /// size, model choice) or is unknown and therefore not retried by
    /// default. Callers may widen `Generic` per call through the retry
    /// orchestrator's `retry_if` hook.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }

    /// Suggested delay before retrying, when the backend supplied one.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } if !retry_after.is_zero() => Some(*retry_after),
            _ => None,
        }
    }

    /// Machine-readable code for telemetry.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication { .. } => ErrorCode::AuthFailed,
            Self::RateLimit { .. } => ErrorCode::ProviderRateLimit,
            Self::ContextLength { .. } => ErrorCode::ProviderContextLength,
            Self::InvalidModel { .. } => ErrorCode::ProviderNotFound,
            Self::Generic { code, .. } => *code,
        }
    }

    /// Severity for log levels and alert routing.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Authentication { .. } => Severity::High,
            Self::RateLimit { .. } => Severity::Low,
            Self::ContextLength { .. } => Severity::Medium,
            Self::InvalidModel { .. } => Severity::Medium,
            Self::Generic { code, .. } => match code {
                ErrorCode::ProviderUnavailable => Severity::High,
                ErrorCode::RequestCancelled => Severity::Low,
                _ => Severity::Medium,
            },
        }
    }

    /// The provider that raised this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::Authentication { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::ContextLength { provider, .. }
            | Self::InvalidModel { provider, .. }
            | Self::Generic { provider, .. } => provider,
        }
    }

    /// Whether this error records a caller-side cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Generic {
                code: ErrorCode::RequestCancelled,
                ..
            }
        )
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_response("", err.to_string())
    }
}

/// Extract the `Retry-After` hint from response headers.
///
/// Backends send either delay-seconds or an HTTP date; anything else (or
/// nothing) yields `Duration::ZERO`, meaning "no hint".
pub fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Duration {
    let Some(raw) = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
    else {
        return Duration::ZERO;
    };

    if let Ok(seconds) = raw.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(at) = chrono::DateTime::parse_from_rfc2822(raw) {
        let until = at.signed_duration_since(chrono::Utc::now());
        if until.num_seconds() > 0 {
            return Duration::from_secs(until.num_seconds() as u64);
        }
    }

    Duration::ZERO
}
