//! Circuit breaker for the storage endpoint.
//!
//! CLOSED -> OPEN after `threshold` consecutive failures, OPEN -> HALF_OPEN
//! once `cooldown` has elapsed, HALF_OPEN admits exactly one trial call whose
//! outcome closes or reopens the circuit.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{StorageError, StorageResult};

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub threshold: u32,
    /// Time the circuit stays open before a trial call is admitted
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let threshold: u32 = std::env::var("RELAY_BREAKER_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let cooldown_secs: u64 = std::env::var("RELAY_BREAKER_COOLDOWN_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Self {
            threshold: threshold.max(1),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Testing recovery with a single call
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of the breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub state: CircuitState,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Shared circuit breaker. Clones observe and mutate the same state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                last_failure_at: None,
                trial_in_flight: false,
            })),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to make a call.
    ///
    /// Returns a permit that must be settled with the call's outcome. Fails
    /// with [`StorageError::CircuitOpen`] while open or while the half-open
    /// trial is taken.
    pub fn try_acquire(&self) -> StorageResult<CircuitPermit> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| Instant::now().duration_since(at) >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit half-open, admitting trial call");
                    Ok(self.permit(true))
                } else {
                    Err(StorageError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(StorageError::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> CircuitPermit {
        CircuitPermit {
            breaker: self.clone(),
            trial,
            settled: false,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("Circuit closed after successful trial call");
            }
            // A call admitted before the circuit opened says nothing about recovery.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(failure_count = inner.failure_count, "Circuit opened");
            }
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(failure_count = inner.failure_count, "Trial call failed, circuit reopened");
            }
            _ => {}
        }
    }

    fn on_abandon(&self, trial: bool) {
        if trial {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    /// Get current state for monitoring.
    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            failure_count: inner.failure_count,
            state: inner.state,
            last_failure_at: inner.last_failure_at,
        }
    }
}

/// Admission ticket for one call.
///
/// Dropping it without settling releases a half-open trial slot without
/// recording an outcome.
#[must_use = "settle the permit with the call outcome"]
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Release the permit without recording an outcome.
    pub fn abandon(self) {
        drop(self);
    }

    /// Settle from a call result.
    ///
    /// A response that says nothing about endpoint health (client rejection,
    /// not found) still proves the endpoint answered and counts as success.
    /// Errors raised before the request went out record nothing.
    pub fn record<T>(self, result: &StorageResult<T>) {
        match result {
            Ok(_) => self.success(),
            Err(e) if e.is_pre_request() => self.abandon(),
            Err(e) if e.counts_as_breaker_failure() => self.failure(),
            Err(_) => self.success(),
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.trial);
        }
    }
}
