//! Circuit breaker
//!
//! Stops calling a failing dependency for a cooldown period instead of
//! hammering it. Open-circuit rejections are non-retryable, so an outer
//! retry wrapper fails fast rather than burning its budget against a
//! tripped breaker.

use crate::providers::error::{ProviderError, ProviderResult};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// One trial call probes whether the dependency recovered
    HalfOpen,
}

/// Observable counters for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Time since the last state transition
    pub since_transition: Duration,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition: Instant,
    /// Guards the single half-open trial slot
    trial_in_flight: bool,
}

/// A resilience state machine guarding one dependency.
///
/// All transitions are serialized under this instance's lock; the guarded
/// operation itself runs with no lock held.
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_transition: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    /// Run `op` through the breaker. When the circuit is open (or the
    /// half-open trial slot is taken) the operation is not invoked and a
    /// non-retryable unavailable error returns immediately.
    pub async fn call<T, F, Fut>(&self, op: F) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    fn try_acquire(&self) -> ProviderResult<()> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open
            && inner.last_transition.elapsed() >= self.reset_timeout
        {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            inner.last_transition = Instant::now();
            debug!("circuit breaker half-open, allowing one trial call");
        }

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(rejection("circuit breaker is open")),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(rejection("circuit breaker trial already in flight"));
                }
                inner.trial_in_flight = true;
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        if inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.success_threshold
        {
            inner.state = CircuitState::Closed;
            inner.last_transition = Instant::now();
            debug!("circuit breaker closed");
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            // A failed trial reopens immediately and restarts the timeout.
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            inner.state = CircuitState::Open;
            inner.last_transition = Instant::now();
            warn!(
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }

    /// Current position.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Observable snapshot.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            since_transition: inner.last_transition.elapsed(),
        }
    }

    /// Manually close the breaker and clear its counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.trial_in_flight = false;
        inner.last_transition = Instant::now();
    }
}

fn rejection(message: &str) -> ProviderError {
    ProviderError::unavailable("circuit-breaker", message)
}
