//! Per-handler circuit breakers for failure isolation

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

/// Read-only view of one breaker for statistics
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Tracks failure state per handler/event-type pair.
///
/// Breakers are created lazily on first failure and live for the lifetime
/// of the bus. A misbehaving handler is short-circuited without affecting
/// delivery to other handlers of the same event.
pub struct CircuitBreakerBank {
    breakers: DashMap<String, CircuitBreaker>,
    failure_threshold: u32,
    recovery_timeout: chrono::Duration,
}

impl CircuitBreakerBank {
    /// Create a bank with the given open threshold and recovery timeout
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            recovery_timeout: chrono::Duration::from_std(recovery_timeout)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Breaker key for a handler/event-type pair
    pub fn key(handler: &str, event_type: &str) -> String {
        format!("{handler}:{event_type}")
    }

    /// Decide whether an invocation may proceed.
    ///
    /// Closed (or untracked) breakers admit the call. An open breaker denies
    /// it until the recovery timeout elapses, at which point the next caller
    /// transitions it to half-open and becomes the single probe; further
    /// callers are denied until the probe reports back.
    pub fn try_acquire(&self, key: &str) -> bool {
        let Some(mut breaker) = self.breakers.get_mut(key) else {
            return true;
        };

        match breaker.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed_recovery = breaker
                    .opened_at
                    .map_or(true, |opened| Utc::now() - opened > self.recovery_timeout);
                if elapsed_recovery {
                    breaker.state = BreakerState::HalfOpen;
                    tracing::info!(breaker = %key, "circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful invocation; closes the breaker and resets its
    /// failure count.
    pub fn record_success(&self, key: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(key) {
            if breaker.state != BreakerState::Closed {
                tracing::info!(breaker = %key, "circuit breaker closed");
            }
            breaker.state = BreakerState::Closed;
            breaker.failure_count = 0;
            breaker.opened_at = None;
        }
    }

    /// Record a failed invocation (error or timeout)
    pub fn record_failure(&self, key: &str) {
        let mut breaker = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreaker::new);

        breaker.failure_count += 1;

        match breaker.state {
            BreakerState::HalfOpen => {
                // Failed probe re-opens with a fresh recovery window
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Utc::now());
                tracing::warn!(breaker = %key, "circuit breaker re-opened after failed probe");
            }
            BreakerState::Closed if breaker.failure_count >= self.failure_threshold => {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Utc::now());
                tracing::warn!(
                    breaker = %key,
                    failures = breaker.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Current failure count for a breaker, zero if untracked
    pub fn failure_count(&self, key: &str) -> u32 {
        self.breakers
            .get(key)
            .map(|breaker| breaker.failure_count)
            .unwrap_or(0)
    }

    /// Current state for a breaker, closed if untracked
    pub fn state(&self, key: &str) -> BreakerState {
        self.breakers
            .get(key)
            .map(|breaker| breaker.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot every tracked breaker
    pub fn snapshot(&self) -> std::collections::HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    BreakerSnapshot {
                        state: entry.state,
                        failure_count: entry.failure_count,
                        opened_at: entry.opened_at,
                    },
                )
            })
            .collect()
    }
}
