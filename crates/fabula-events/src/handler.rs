//! Handler trait, subscription options, and typed event filters

use crate::core::Event;
use crate::errors::EventResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Event type used for registrations that receive every event
pub const GLOBAL_EVENT_TYPE: &str = "*";

/// A registered callback invoked when a matching event is dispatched.
///
/// `name()` is the handler's identity for circuit-breaker keying and
/// statistics; two registrations of the same handler instance share one
/// breaker per event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name
    fn name(&self) -> &str;

    /// Process one event
    async fn handle(&self, event: &Event) -> EventResult<()>;
}

/// Metadata fields addressable by typed filters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    EventId,
    Source,
    Priority,
    DeliveryMode,
    CorrelationId,
    CausationId,
}

/// A declarative filter evaluated against an event before delivery.
///
/// Metadata filters are keyed by [`MetadataField`] so the comparison target
/// is checked at compile time; payload filters look up a top-level field of
/// a JSON object payload by name. A missing payload field never matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPredicate {
    /// Compare a metadata field against an expected value
    Metadata {
        field: MetadataField,
        equals: serde_json::Value,
    },

    /// Compare a top-level payload field against an expected value
    Payload {
        field: String,
        equals: serde_json::Value,
    },

    /// Require a tag to be present on the event
    HasTag { tag: String },
}

impl FilterPredicate {
    /// Build a metadata equality filter
    pub fn metadata(field: MetadataField, equals: impl Into<serde_json::Value>) -> Self {
        Self::Metadata {
            field,
            equals: equals.into(),
        }
    }

    /// Build a payload equality filter
    pub fn payload(field: impl Into<String>, equals: impl Into<serde_json::Value>) -> Self {
        Self::Payload {
            field: field.into(),
            equals: equals.into(),
        }
    }

    /// Build a tag-presence filter
    pub fn has_tag(tag: impl Into<String>) -> Self {
        Self::HasTag { tag: tag.into() }
    }

    /// Check if an event satisfies this predicate
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            FilterPredicate::Metadata { field, equals } => {
                metadata_value(event, *field) == *equals
            }
            FilterPredicate::Payload { field, equals } => event
                .payload
                .as_object()
                .and_then(|object| object.get(field))
                .map_or(false, |value| value == equals),
            FilterPredicate::HasTag { tag } => event.metadata.tags.contains(tag),
        }
    }
}

fn metadata_value(event: &Event, field: MetadataField) -> serde_json::Value {
    let meta = &event.metadata;
    match field {
        MetadataField::EventId => serde_json::Value::String(meta.event_id.to_string()),
        MetadataField::Source => serde_json::Value::String(meta.source.clone()),
        MetadataField::Priority => serde_json::Value::String(meta.priority.as_str().to_string()),
        MetadataField::DeliveryMode => {
            serde_json::to_value(meta.delivery_mode).unwrap_or(serde_json::Value::Null)
        }
        MetadataField::CorrelationId => meta
            .correlation_id
            .map(|id| serde_json::Value::String(id.to_string()))
            .unwrap_or(serde_json::Value::Null),
        MetadataField::CausationId => meta
            .causation_id
            .map(|id| serde_json::Value::String(id.to_string()))
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Subscription options applied when registering a handler
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Registry ordering priority; higher registrations sort first
    pub priority: i32,

    /// Filters an event must satisfy for delivery; all must match
    pub filters: Vec<FilterPredicate>,

    /// Maximum concurrent invocations of this registration across events
    pub max_concurrent: usize,

    /// Per-invocation deadline
    pub timeout: Duration,

    /// Label: whether the handler wants failed deliveries retried
    pub retry_on_failure: bool,

    /// Label: whether the handler opts into dead-letter capture
    pub dead_letter_queue: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            filters: Vec::new(),
            max_concurrent: 10,
            timeout: Duration::from_secs(30),
            retry_on_failure: false,
            dead_letter_queue: true,
        }
    }
}

impl SubscribeOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set registry ordering priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a filter predicate
    pub fn with_filter(mut self, filter: FilterPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    /// Set the concurrency limit
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the per-invocation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A handler registered for an event type (or globally)
#[derive(Clone)]
pub struct HandlerRegistration {
    /// The handler to invoke
    pub handler: Arc<dyn EventHandler>,

    /// Event type this registration listens to; [`GLOBAL_EVENT_TYPE`] for all
    pub event_type: String,

    /// Registry ordering priority
    pub priority: i32,

    /// Delivery filters; all must match
    pub filters: Vec<FilterPredicate>,

    /// Per-invocation deadline
    pub timeout: Duration,

    /// Label: retry request for failed deliveries
    pub retry_on_failure: bool,

    /// Label: dead-letter opt-in
    pub dead_letter_queue: bool,

    /// Limits concurrent invocations of this registration
    pub(crate) concurrency: Arc<Semaphore>,
}

impl HandlerRegistration {
    /// Create a registration from subscription options
    pub fn new(
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            handler,
            event_type: event_type.into(),
            priority: options.priority,
            filters: options.filters,
            timeout: options.timeout,
            retry_on_failure: options.retry_on_failure,
            dead_letter_queue: options.dead_letter_queue,
            concurrency: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
        }
    }

    /// Check if an event passes this registration's filters.
    ///
    /// A registration with no filters matches unconditionally.
    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().all(|filter| filter.matches(event))
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("handler", &self.handler.name())
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("filters", &self.filters)
            .field("timeout", &self.timeout)
            .finish()
    }
}
