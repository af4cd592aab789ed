//! Recovery strategies
//!
//! Retry backoff, circuit breaking, and fallback execution over the
//! provider error taxonomy. Recovery is always an explicit wrapper the
//! caller applies around a provider call; providers never retry
//! internally, so a wrapped call is the only source of repeat requests.

pub mod breaker;
pub mod fallback;
pub mod retry;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use fallback::{fallback, fallback_if, fallback_value};
pub use retry::{retry, BackoffStrategy, ExponentialBackoff, LinearBackoff, RetryConfig};
