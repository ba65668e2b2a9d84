//! # Fabula Events
//!
//! Priority-aware asynchronous publish/subscribe core for the Fabula
//! narrative simulation backend: five priority dispatch lanes with a
//! dedicated worker each, concurrent handler fan-out with per-handler
//! timeouts, circuit breakers isolating misbehaving handlers, a bounded
//! event store supporting replay, and a dead-letter queue for dispatches
//! that fail catastrophically.
//!
//! The bus is single-process and in-memory: no cross-process transport, no
//! durable persistence, and no exactly-once guarantees.
//!
//! ```no_run
//! use fabula_events::{Event, EventBus, EventBusConfig, SubscribeOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(handler: Arc<dyn fabula_events::EventHandler>) {
//! let bus = EventBus::new(EventBusConfig::default());
//! bus.subscribe("turn.completed", handler, SubscribeOptions::new().with_priority(10));
//! bus.publish(Event::new("turn.completed", json!({"turn": 1}))).await;
//! # }
//! ```

pub mod breaker;
pub mod bus;
pub mod config;
pub mod core;
pub mod dead_letter;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod registry;
pub mod sink;
pub mod stats;
pub mod store;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreakerBank};
pub use bus::{EventBus, REPLAY_SOURCE};
pub use config::EventBusConfig;
pub use crate::core::{DeliveryMode, Event, EventMetadata, EventPriority};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use dispatcher::EventProcessingResult;
pub use errors::{EventError, EventResult};
pub use handler::{
    EventHandler, FilterPredicate, HandlerRegistration, MetadataField, SubscribeOptions,
    GLOBAL_EVENT_TYPE,
};
pub use registry::HandlerRegistry;
pub use sink::{ErrorContext, ErrorSink, TracingSink};
pub use stats::{BusStatistics, EventTypeMetrics, ProcessingStats};
pub use store::EventStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
