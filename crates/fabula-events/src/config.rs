//! Event bus configuration

use std::time::Duration;

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of each priority lane queue
    pub queue_capacity: usize,

    /// Whether published events are appended to the event store
    pub store_events: bool,

    /// Maximum events retained by the event store
    pub store_capacity: usize,

    /// Maximum entries retained by the dead-letter queue
    pub dead_letter_capacity: usize,

    /// Consecutive failures before a handler's circuit opens
    pub breaker_failure_threshold: u32,

    /// How long an open circuit waits before admitting a half-open probe
    pub breaker_recovery_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            store_events: true,
            store_capacity: 100_000,
            dead_letter_capacity: 10_000,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
        }
    }
}
