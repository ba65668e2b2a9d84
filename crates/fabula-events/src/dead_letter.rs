//! Dead-letter queue for events whose dispatch failed catastrophically

use crate::core::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// A dead-lettered event with the orchestration error that stranded it
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub event: Event,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// Bounded capture of events whose dispatch orchestration failed.
///
/// Ordinary handler failures never land here; only errors in resolving or
/// fanning out an event's delivery as a whole do. Entries are drained by
/// operator action only.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Create a queue retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Capture a failed event, evicting the oldest entry when full
    pub fn push(&self, event: Event, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!(
            event_id = %event.metadata.event_id,
            event_type = %event.event_type,
            error = %error,
            "event dead-lettered"
        );

        let retry_count = event.metadata.retry_count;
        let mut entries = self.entries.lock();
        entries.push_back(DeadLetterEntry {
            event,
            error,
            timestamp: Utc::now(),
            retry_count,
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Snapshot of the current entries, oldest first
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of captured entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
