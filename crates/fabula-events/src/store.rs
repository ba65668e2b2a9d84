//! Bounded append-only event store with id and correlation indices

use crate::core::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Bounded append-only log of published events supporting lookup and replay.
///
/// The insertion ring and both indices mutate together under one lock;
/// evicting the oldest entry removes it from the id map and the correlation
/// index so neither grows past the ring.
pub struct EventStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

#[derive(Default)]
struct StoreInner {
    /// Event ids in insertion order
    order: VecDeque<Uuid>,
    /// Primary index by event id
    events: HashMap<Uuid, Event>,
    /// Secondary index: correlation id to event ids, insertion order
    by_correlation: HashMap<Uuid, Vec<Uuid>>,
}

impl EventStore {
    /// Create a store retaining at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest entry when full
    pub fn store_event(&self, event: &Event) {
        let mut inner = self.inner.lock();

        let event_id = event.metadata.event_id;
        inner.order.push_back(event_id);
        if let Some(correlation_id) = event.metadata.correlation_id {
            inner
                .by_correlation
                .entry(correlation_id)
                .or_default()
                .push(event_id);
        }
        inner.events.insert(event_id, event.clone());

        while inner.order.len() > self.capacity {
            let Some(evicted_id) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.events.remove(&evicted_id) {
                if let Some(correlation_id) = evicted.metadata.correlation_id {
                    if let Some(ids) = inner.by_correlation.get_mut(&correlation_id) {
                        ids.retain(|id| *id != evicted_id);
                        if ids.is_empty() {
                            inner.by_correlation.remove(&correlation_id);
                        }
                    }
                }
            }
        }
    }

    /// Look up an event by id
    pub fn get_event(&self, event_id: Uuid) -> Option<Event> {
        self.inner.lock().events.get(&event_id).cloned()
    }

    /// Events sharing a correlation id, in insertion order
    pub fn events_by_correlation(&self, correlation_id: Uuid) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .by_correlation
            .get(&correlation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.events.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent events of one type, newest first, capped at `limit`
    pub fn events_by_type(&self, event_type: &str, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.events.get(id))
            .filter(|event| event.event_type == event_type)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent events of any type, newest first, capped at `limit`
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.events.get(id).cloned())
            .take(limit)
            .collect()
    }

    /// Select events for replay, in insertion order.
    ///
    /// Every provided criterion must hold; `None` criteria match everything.
    pub fn select(
        &self,
        event_type: Option<&str>,
        correlation_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.events.get(id))
            .filter(|event| event_type.map_or(true, |t| event.event_type == t))
            .filter(|event| {
                correlation_id.map_or(true, |c| event.metadata.correlation_id == Some(c))
            })
            .filter(|event| from.map_or(true, |from| event.metadata.timestamp >= from))
            .filter(|event| to.map_or(true, |to| event.metadata.timestamp <= to))
            .cloned()
            .collect()
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
