//! Rate-limit header tracking
//!
//! Backends advertise their windows through `x-ratelimit-*` response
//! headers. Each adapter owns one tracker and records every call, so the
//! application can observe how close it is to a limit before the backend
//! starts returning 429s.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of what we currently know about a provider's rate limits.
#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    /// Request limit for the current window
    pub requests_limit: Option<u32>,

    /// Requests remaining in the current window
    pub requests_remaining: Option<u32>,

    /// Token limit for the current window
    pub tokens_limit: Option<u32>,

    /// Tokens remaining in the current window
    pub tokens_remaining: Option<u32>,

    /// When the current window resets
    pub reset_at: Option<DateTime<Utc>>,

    /// Requests recorded by this tracker
    pub requests_used: u32,

    /// Tokens recorded by this tracker
    pub tokens_used: u32,
}

/// Shared, lock-guarded rate-limit state for one provider instance.
#[derive(Debug, Clone, Default)]
pub struct RateLimitTracker {
    info: Arc<Mutex<RateLimitInfo>>,
}

fn header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb `x-ratelimit-*` headers from a response.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let mut info = self.info.lock();

        if let Some(v) = header_u32(headers, "x-ratelimit-limit-requests") {
            info.requests_limit = Some(v);
        }
        if let Some(v) = header_u32(headers, "x-ratelimit-remaining-requests") {
            info.requests_remaining = Some(v);
        }
        if let Some(v) = header_u32(headers, "x-ratelimit-limit-tokens") {
            info.tokens_limit = Some(v);
        }
        if let Some(v) = header_u32(headers, "x-ratelimit-remaining-tokens") {
            info.tokens_remaining = Some(v);
        }
        if let Some(raw) = headers
            .get("x-ratelimit-reset-requests")
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(epoch) = raw.parse::<i64>() {
                info.reset_at = DateTime::from_timestamp(epoch, 0);
            }
        }
    }

    /// Record one completed request and the tokens it consumed.
    pub fn record_request(&self, tokens: u32) {
        let mut info = self.info.lock();
        info.requests_used += 1;
        info.tokens_used += tokens;
        if let Some(remaining) = info.requests_remaining {
            info.requests_remaining = Some(remaining.saturating_sub(1));
        }
        if let Some(remaining) = info.tokens_remaining {
            info.tokens_remaining = Some(remaining.saturating_sub(tokens));
        }
    }

    /// Current snapshot.
    pub fn info(&self) -> RateLimitInfo {
        self.info.lock().clone()
    }

    /// How long to wait before the window resets, if the tracked state
    /// says the request budget is exhausted.
    pub fn should_wait(&self) -> Option<Duration> {
        let info = self.info.lock();
        if info.requests_remaining? > 0 {
            return None;
        }
        let reset = info.reset_at?;
        let until = reset.signed_duration_since(Utc::now());
        if until.num_seconds() > 0 {
            Some(Duration::from_secs(until.num_seconds() as u64))
        } else {
            None
        }
    }
}
