//! Circuit breaker guarding calls to the payment gateway.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected until the timeout elapses
    Open,
    /// A trial call is allowed to probe recovery
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before a trial call
    pub timeout: Duration,
    /// Successful trial calls needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `f` unless the circuit is open, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.timeout);
                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                }
                elapsed
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.opened_at = None;
                }
            }
            _ => state.failure_count = 0,
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        let trip = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            warn!(breaker = self.name, failures = state.failure_count, "circuit opened");
            state.state = CircuitState::Open;
            state.opened_at = Some(Instant::now());
        }
    }
}
