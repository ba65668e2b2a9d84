//! Handler registry with priority-ordered, filterable subscriptions

use crate::core::Event;
use crate::handler::{EventHandler, HandlerRegistration, SubscribeOptions, GLOBAL_EVENT_TYPE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Stores per-type and global handler registrations.
///
/// One lock guards every registry map so concurrent subscribe, unsubscribe,
/// and dispatch-time resolution never observe a partially updated registry.
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<String, Vec<HandlerRegistration>>,
    global: Vec<HandlerRegistration>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a handler for one event type.
    ///
    /// No uniqueness constraint applies: the same handler may be registered
    /// multiple times, and each matching registration produces its own
    /// delivery.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) {
        let event_type = event_type.into();
        let registration = HandlerRegistration::new(event_type.clone(), handler, options);

        let mut inner = self.inner.write();
        let registrations = inner.by_type.entry(event_type.clone()).or_default();
        registrations.push(registration);
        registrations.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::debug!(
            event_type = %event_type,
            count = registrations.len(),
            "handler subscribed"
        );
    }

    /// Register a handler for every event type
    pub fn subscribe_to_all(&self, handler: Arc<dyn EventHandler>, options: SubscribeOptions) {
        let registration = HandlerRegistration::new(GLOBAL_EVENT_TYPE, handler, options);

        let mut inner = self.inner.write();
        inner.global.push(registration);
        inner.global.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::debug!(count = inner.global.len(), "global handler subscribed");
    }

    /// Remove every registration of this exact handler instance under a type.
    ///
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut inner = self.inner.write();

        let removed = if event_type == GLOBAL_EVENT_TYPE {
            let before = inner.global.len();
            inner
                .global
                .retain(|registration| !Arc::ptr_eq(&registration.handler, handler));
            before - inner.global.len()
        } else if let Some(registrations) = inner.by_type.get_mut(event_type) {
            let before = registrations.len();
            registrations.retain(|registration| !Arc::ptr_eq(&registration.handler, handler));
            let removed = before - registrations.len();
            if registrations.is_empty() {
                inner.by_type.remove(event_type);
            }
            removed
        } else {
            0
        };

        if removed > 0 {
            tracing::debug!(event_type = %event_type, removed, "handler unsubscribed");
        }
        removed > 0
    }

    /// Resolve the registrations applicable to an event: type-specific then
    /// global, each retained only if its filters match.
    pub fn applicable_handlers(&self, event: &Event) -> Vec<HandlerRegistration> {
        let inner = self.inner.read();
        let mut applicable = Vec::new();

        if let Some(registrations) = inner.by_type.get(&event.event_type) {
            applicable.extend(
                registrations
                    .iter()
                    .filter(|registration| registration.matches(event))
                    .cloned(),
            );
        }

        applicable.extend(
            inner
                .global
                .iter()
                .filter(|registration| registration.matches(event))
                .cloned(),
        );

        applicable
    }

    /// Number of type-specific registrations
    pub fn handler_count(&self) -> usize {
        self.inner
            .read()
            .by_type
            .values()
            .map(|registrations| registrations.len())
            .sum()
    }

    /// Number of global registrations
    pub fn global_handler_count(&self) -> usize {
        self.inner.read().global.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
