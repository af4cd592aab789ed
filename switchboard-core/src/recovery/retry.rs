//! Retry backoff strategies and the retry orchestrator

use crate::providers::error::{ProviderError, ProviderResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides whether and when a failed operation is re-attempted.
pub trait BackoffStrategy: Send + Sync {
    /// Total invocation budget, including the initial attempt.
    fn max_attempts(&self) -> u32;

    /// Delay before the attempt that follows `attempt` (0-based count of
    /// completed attempts).
    fn delay(&self, attempt: u32) -> Duration;

    /// Whether `error` after `attempt` completed attempts warrants
    /// another try. Non-retryable errors abort immediately, without
    /// consuming a retry.
    fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts() && error.is_retryable()
    }
}

/// `delay(n) = min(initial × multiplier^n, max)`, optionally jittered by a
/// uniform factor in [0, 1) applied multiplicatively.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_attempts,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter {
            capped * rand::thread_rng().gen::<f64>()
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Constant delay between attempts.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl LinearBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self { delay, max_attempts }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

type RetryHook = Box<dyn Fn(u32, &ProviderError) + Send + Sync>;
type FinalErrorHook = Box<dyn Fn(&ProviderError) + Send + Sync>;
type RetryPredicate = Box<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Configuration for [`retry`].
pub struct RetryConfig {
    pub strategy: Box<dyn BackoffStrategy>,
    on_retry: Option<RetryHook>,
    on_final_error: Option<FinalErrorHook>,
    retry_if: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: Box::new(ExponentialBackoff::default()),
            on_retry: None,
            on_final_error: None,
            retry_if: None,
        }
    }
}

impl RetryConfig {
    pub fn new(strategy: impl BackoffStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
            ..Default::default()
        }
    }

    /// Observer invoked before each retry with the completed attempt
    /// number and the error that triggered it.
    pub fn on_retry(mut self, hook: impl Fn(u32, &ProviderError) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Observer invoked once when the budget is exhausted or the error is
    /// not retryable.
    pub fn on_final_error(mut self, hook: impl Fn(&ProviderError) + Send + Sync + 'static) -> Self {
        self.on_final_error = Some(Box::new(hook));
        self
    }

    /// Per-call widening of retryability. Consulted only for `Generic`
    /// errors; the fixed taxonomy decides every other variant.
    pub fn retry_if(mut self, predicate: impl Fn(&ProviderError) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Box::new(predicate));
        self
    }

    fn is_retryable(&self, error: &ProviderError) -> bool {
        if error.is_retryable() {
            return true;
        }
        match (error, &self.retry_if) {
            (ProviderError::Generic { .. }, Some(predicate)) => predicate(error),
            _ => false,
        }
    }
}

/// Run `op` until it succeeds, the retry budget is exhausted, the error is
/// not retryable, or `cancel` fires. Backoff sleeps honor the rate-limit
/// hint when the error carries one, and cancellation aborts both the
/// sleep and the whole retry.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let max_attempts = config.strategy.max_attempts().max(1);
    let mut attempt = 0;

    let last_error = loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled(""));
        }

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let will_retry =
            attempt + 1 < max_attempts && config.is_retryable(&error);
        if !will_retry {
            break error;
        }

        if let Some(hook) = &config.on_retry {
            hook(attempt, &error);
        }

        let mut delay = config.strategy.delay(attempt);
        if let Some(hint) = error.retry_delay() {
            delay = delay.max(hint);
        }
        debug!(attempt, ?delay, %error, "retrying after backoff");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProviderError::cancelled(error.provider()));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    };

    if let Some(hook) = &config.on_final_error {
        hook(&last_error);
    }
    Err(last_error)
}
