//! Event bus error types

use crate::core::EventPriority;
use thiserror::Error;

/// Event bus error types
#[derive(Error, Debug)]
pub enum EventError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A priority lane rejected an enqueue because it was full
    #[error("Event queue for {priority:?} lane is full (capacity: {capacity})")]
    QueueFull {
        priority: EventPriority,
        capacity: usize,
    },

    /// The bus is not running and could not accept the event
    #[error("Event bus is not running")]
    NotRunning,

    /// A handler invocation exceeded its deadline
    #[error("Handler '{handler}' timed out after {duration_ms}ms")]
    HandlerTimeout { handler: String, duration_ms: u64 },

    /// A handler invocation returned an error or panicked
    #[error("Handler '{handler}' failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    /// The circuit breaker for a handler is open
    #[error("Circuit breaker is open for handler: {0}")]
    CircuitBreakerOpen(String),

    /// Waiting for handler completion exceeded the caller's deadline
    #[error("Timed out after {duration_ms}ms waiting for event processing")]
    WaitTimeout { duration_ms: u64 },

    /// The event expired before it could be dispatched
    #[error("Event expired before dispatch: {0}")]
    EventExpired(uuid::Uuid),

    /// Dispatch orchestration failed outside any single handler invocation
    #[error("Event dispatch failed: {0}")]
    DispatchError(String),

    /// Internal system error
    #[error("Internal event bus error: {0}")]
    InternalError(String),
}

impl EventError {
    /// Create a dispatch orchestration error
    pub fn dispatch_error(msg: impl Into<String>) -> Self {
        Self::DispatchError(msg.into())
    }

    /// Create a handler failure error
    pub fn handler_failed(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Create a handler timeout error
    pub fn handler_timeout(handler: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::HandlerTimeout {
            handler: handler.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Event bus result type
pub type EventResult<T> = Result<T, EventError>;
