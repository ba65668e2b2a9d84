//! Core event types for the Fabula event bus

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// An immutable typed message flowing through the bus.
///
/// Events are never mutated after publication; the `with_*` methods produce
/// derived copies with fresh metadata overrides, which is how replayed
/// events are linked back to their origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Type of the event, e.g. `"turn.completed"` or `"persona.decision"`
    pub event_type: String,

    /// Opaque event payload
    pub payload: serde_json::Value,

    /// Delivery and tracing metadata
    pub metadata: EventMetadata,
}

impl Event {
    /// Create a new event with a freshly assigned id and timestamp
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: EventMetadata::new(),
        }
    }

    /// Set the event source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    /// Set the dispatch priority
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Set the delivery mode label
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.metadata.delivery_mode = mode;
        self
    }

    /// Derive a copy linked to a correlation chain
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    /// Derive a copy recording the event that caused this one
    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.metadata.causation_id = Some(causation_id);
        self
    }

    /// Set max retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.metadata.max_retries = max_retries;
        self
    }

    /// Set an expiry deadline relative to now
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        let deadline = ChronoDuration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.metadata.expires_at = Some(deadline);
        self
    }

    /// Tag the event for filtering and inspection
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.insert(tag.into());
        self
    }

    /// Check if the event has passed its expiry deadline
    pub fn is_expired(&self) -> bool {
        self.metadata
            .expires_at
            .map_or(false, |deadline| deadline <= Utc::now())
    }

    /// Check if the event has retry budget remaining
    pub fn can_retry(&self) -> bool {
        self.metadata.retry_count < self.metadata.max_retries
    }
}

/// Metadata attached to every event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    /// Unique identifier, assigned at construction
    pub event_id: Uuid,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Source component that published the event
    pub source: String,

    /// Correlation ID linking logically related events
    pub correlation_id: Option<Uuid>,

    /// Causation ID - the event that caused this event
    pub causation_id: Option<Uuid>,

    /// Dispatch lane for this event
    pub priority: EventPriority,

    /// Delivery mode label; only fire-and-forget is enforced
    pub delivery_mode: DeliveryMode,

    /// Number of times this event has been retried
    pub retry_count: u32,

    /// Maximum retry attempts allowed
    pub max_retries: u32,

    /// Optional expiry deadline; expired events are not dispatched
    pub expires_at: Option<DateTime<Utc>>,

    /// Free-form tags
    pub tags: HashSet<String>,
}

impl EventMetadata {
    /// Create metadata with a fresh id and timestamp
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: String::new(),
            correlation_id: None,
            causation_id: None,
            priority: EventPriority::Normal,
            delivery_mode: DeliveryMode::FireAndForget,
            retry_count: 0,
            max_retries: 3,
            expires_at: None,
            tags: HashSet::new(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Event priority levels, one dispatch lane per level
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
    System,
}

impl EventPriority {
    /// All priorities in lane order
    pub const ALL: [EventPriority; 5] = [
        EventPriority::Low,
        EventPriority::Normal,
        EventPriority::High,
        EventPriority::Critical,
        EventPriority::System,
    ];

    /// Lane index for this priority
    pub fn lane(self) -> usize {
        match self {
            EventPriority::Low => 0,
            EventPriority::Normal => 1,
            EventPriority::High => 2,
            EventPriority::Critical => 3,
            EventPriority::System => 4,
        }
    }

    /// Human-readable lane name
    pub fn as_str(self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
            EventPriority::System => "system",
        }
    }
}

/// Delivery mode labels.
///
/// The dispatcher enforces fire-and-forget only; the remaining variants are
/// carried for forward compatibility with richer delivery contracts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    FireAndForget,
    AtLeastOnce,
    ExactlyOnce,
    Ordered,
}
