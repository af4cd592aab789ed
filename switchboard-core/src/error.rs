//! Machine-readable error codes and severities
//!
//! Every failure surfaced by this crate carries a code from the fixed set
//! below and a severity level. Both exist for observability (log fields,
//! telemetry dimensions) and are attached independently of retryability.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error code attached to every classified failure.
///
/// The set is closed on purpose: downstream dashboards and alerts key off
/// these strings, so new codes are additions, never renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration
    ConfigInvalid,
    ConfigMissing,
    ConfigParse,
    ConfigValidation,

    // Authentication
    AuthFailed,
    AuthInvalidToken,
    AuthExpiredToken,
    AuthPermissionDenied,
    AuthInvalidCredentials,

    // Provider
    ProviderUnavailable,
    ProviderTimeout,
    ProviderRateLimit,
    ProviderInvalidResponse,
    ProviderNotFound,
    ProviderContextLength,

    // Tool execution
    ToolNotFound,
    ToolExecutionFailed,
    ToolTimeout,
    ToolInvalidInput,
    ToolPermissionDenied,

    // Storage
    DbConnectionFailed,
    DbQueryFailed,
    DbNotFound,
    DbDuplicate,
    DbConstraintViolation,
    DbTransactionFailed,

    // Security
    SecurityViolation,
    SecurityInvalidKey,
    SecurityEncryptionFailed,
    SecurityDecryptionFailed,

    // Cancellation of an in-flight call by the caller
    RequestCancelled,
}

impl ErrorCode {
    /// The wire/log representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ConfigParse => "CONFIG_PARSE",
            Self::ConfigValidation => "CONFIG_VALIDATION",
            Self::AuthFailed => "AUTH_FAILED",
            Self::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            Self::AuthExpiredToken => "AUTH_EXPIRED_TOKEN",
            Self::AuthPermissionDenied => "AUTH_PERMISSION_DENIED",
            Self::AuthInvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::ProviderRateLimit => "PROVIDER_RATE_LIMIT",
            Self::ProviderInvalidResponse => "PROVIDER_INVALID_RESPONSE",
            Self::ProviderNotFound => "PROVIDER_NOT_FOUND",
            Self::ProviderContextLength => "PROVIDER_CONTEXT_LENGTH",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolInvalidInput => "TOOL_INVALID_INPUT",
            Self::ToolPermissionDenied => "TOOL_PERMISSION_DENIED",
            Self::DbConnectionFailed => "DB_CONNECTION_FAILED",
            Self::DbQueryFailed => "DB_QUERY_FAILED",
            Self::DbNotFound => "DB_NOT_FOUND",
            Self::DbDuplicate => "DB_DUPLICATE",
            Self::DbConstraintViolation => "DB_CONSTRAINT_VIOLATION",
            Self::DbTransactionFailed => "DB_TRANSACTION_FAILED",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::SecurityInvalidKey => "SECURITY_INVALID_KEY",
            Self::SecurityEncryptionFailed => "SECURITY_ENCRYPTION_FAILED",
            Self::SecurityDecryptionFailed => "SECURITY_DECRYPTION_FAILED",
            Self::RequestCancelled => "REQUEST_CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a failure, for log levels and alert routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}
