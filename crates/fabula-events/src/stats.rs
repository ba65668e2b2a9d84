//! Dispatch statistics and metrics snapshots

use crate::breaker::BreakerSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Running totals across all dispatched events
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    pub handlers_executed: u64,
    /// Moving average dispatch time in milliseconds
    pub average_processing_time_ms: f64,
}

/// Per-event-type dispatch metrics
#[derive(Debug, Clone, Serialize)]
pub struct EventTypeMetrics {
    pub count: u64,
    pub success_rate: f64,
    pub avg_processing_time_ms: f64,
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct TypeTotals {
    count: u64,
    successes: u64,
    avg_ms: f64,
    last_processed: Option<DateTime<Utc>>,
}

/// Full statistics view returned by the bus facade
#[derive(Debug, Clone, Serialize)]
pub struct BusStatistics {
    pub processing: ProcessingStats,
    pub event_metrics: HashMap<String, EventTypeMetrics>,
    pub handler_count: usize,
    pub global_handler_count: usize,
    pub circuit_breakers: HashMap<String, BreakerSnapshot>,
    pub dead_letter_queue_size: usize,
    pub event_store_size: usize,
}

/// Collects dispatch outcomes from the priority workers
pub struct StatsCollector {
    inner: RwLock<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    processing: ProcessingStats,
    by_type: HashMap<String, TypeTotals>,
}

impl StatsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StatsInner::default()),
        }
    }

    /// Record the outcome of one dispatched event
    pub fn record(
        &self,
        event_type: &str,
        success: bool,
        handlers_executed: u64,
        processing_time: Duration,
    ) {
        let elapsed_ms = processing_time.as_secs_f64() * 1000.0;
        let mut inner = self.inner.write();

        let processing = &mut inner.processing;
        processing.total_events += 1;
        if success {
            processing.successful_events += 1;
        } else {
            processing.failed_events += 1;
        }
        processing.handlers_executed += handlers_executed;
        let n = processing.total_events as f64;
        processing.average_processing_time_ms +=
            (elapsed_ms - processing.average_processing_time_ms) / n;

        let totals = inner.by_type.entry(event_type.to_string()).or_default();
        totals.count += 1;
        if success {
            totals.successes += 1;
        }
        totals.avg_ms += (elapsed_ms - totals.avg_ms) / totals.count as f64;
        totals.last_processed = Some(Utc::now());
    }

    /// Snapshot the running totals
    pub fn processing(&self) -> ProcessingStats {
        self.inner.read().processing.clone()
    }

    /// Snapshot per-type metrics
    pub fn event_metrics(&self) -> HashMap<String, EventTypeMetrics> {
        self.inner
            .read()
            .by_type
            .iter()
            .map(|(event_type, totals)| {
                (
                    event_type.clone(),
                    EventTypeMetrics {
                        count: totals.count,
                        success_rate: if totals.count == 0 {
                            0.0
                        } else {
                            totals.successes as f64 / totals.count as f64
                        },
                        avg_processing_time_ms: totals.avg_ms,
                        last_processed: totals.last_processed,
                    },
                )
            })
            .collect()
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
