//! Event bus facade wiring the registry, breakers, store, and dispatcher

use crate::breaker::CircuitBreakerBank;
use crate::config::EventBusConfig;
use crate::core::{Event, EventPriority};
use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::dispatcher::{spawn_worker, DispatchContext, EventProcessingResult, QueuedEvent};
use crate::errors::EventError;
use crate::handler::{EventHandler, SubscribeOptions};
use crate::registry::HandlerRegistry;
use crate::sink::{ErrorContext, ErrorSink, TracingSink};
use crate::stats::{BusStatistics, StatsCollector};
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Source label attached to replayed event copies
pub const REPLAY_SOURCE: &str = "event_replay";

struct Lanes {
    senders: Vec<mpsc::Sender<QueuedEvent>>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Priority-aware asynchronous publish/subscribe bus.
///
/// Construct one instance and share it via `Arc`; there is deliberately no
/// process-wide singleton. Publishing is fire-and-forget with respect to
/// handler completion - the returned result describes the enqueue outcome.
/// Use [`EventBus::publish_and_wait`] to block until handlers finish.
pub struct EventBus {
    config: EventBusConfig,
    registry: Arc<HandlerRegistry>,
    breakers: Arc<CircuitBreakerBank>,
    store: Arc<EventStore>,
    dead_letters: Arc<DeadLetterQueue>,
    stats: Arc<StatsCollector>,
    sink: Arc<dyn ErrorSink>,
    lanes: Mutex<Option<Lanes>>,
}

impl EventBus {
    /// Create a bus with the default tracing error sink
    pub fn new(config: EventBusConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a bus reporting failures to a custom sink
    pub fn with_sink(config: EventBusConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::new()),
            breakers: Arc::new(CircuitBreakerBank::new(
                config.breaker_failure_threshold,
                config.breaker_recovery_timeout,
            )),
            store: Arc::new(EventStore::new(config.store_capacity)),
            dead_letters: Arc::new(DeadLetterQueue::new(config.dead_letter_capacity)),
            stats: Arc::new(StatsCollector::new()),
            sink,
            lanes: Mutex::new(None),
            config,
        }
    }

    /// Register a handler for one event type
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) {
        self.registry.subscribe(event_type, handler, options);
    }

    /// Register a handler for every event type
    pub fn subscribe_to_all(&self, handler: Arc<dyn EventHandler>, options: SubscribeOptions) {
        self.registry.subscribe_to_all(handler, options);
    }

    /// Remove all registrations of this handler under an event type.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) -> bool {
        self.registry.unsubscribe(event_type, handler)
    }

    /// Start the five priority workers. Idempotent.
    ///
    /// Must be called from within a tokio runtime; `publish` starts the bus
    /// lazily, so calling this explicitly is optional.
    pub fn start(&self) {
        let mut lanes = self.lanes.lock();
        if lanes.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(DispatchContext {
            registry: self.registry.clone(),
            breakers: self.breakers.clone(),
            dead_letters: self.dead_letters.clone(),
            stats: self.stats.clone(),
            sink: self.sink.clone(),
        });

        let mut senders = Vec::with_capacity(EventPriority::ALL.len());
        let mut workers = Vec::with_capacity(EventPriority::ALL.len());
        for priority in EventPriority::ALL {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            senders.push(tx);
            workers.push(spawn_worker(priority, rx, shutdown_rx.clone(), ctx.clone()));
        }

        *lanes = Some(Lanes {
            senders,
            shutdown: shutdown_tx,
            workers,
        });
        tracing::info!(
            lanes = EventPriority::ALL.len(),
            queue_capacity = self.config.queue_capacity,
            "event bus started"
        );
    }

    /// Stop the priority workers and await their termination.
    ///
    /// Best-effort graceful shutdown: a worker torn down mid-dispatch may
    /// abandon its in-flight fan-out. No-op when the bus is not running.
    pub async fn stop(&self) {
        let Some(lanes) = self.lanes.lock().take() else {
            return;
        };

        let _ = lanes.shutdown.send(true);
        drop(lanes.senders);
        for worker in lanes.workers {
            let _ = worker.await;
        }
        tracing::info!("event bus stopped");
    }

    /// Whether the priority workers are running
    pub fn is_running(&self) -> bool {
        self.lanes.lock().is_some()
    }

    /// Publish an event onto the lane matching its priority.
    ///
    /// Lazily starts the bus. The returned result describes the enqueue
    /// outcome only; handler completion is not awaited. A full lane rejects
    /// the event rather than blocking the publisher.
    pub async fn publish(&self, event: Event) -> EventProcessingResult {
        self.enqueue(event, None).await
    }

    /// Publish an event and wait until all applicable handlers have
    /// completed, or until `timeout` elapses.
    ///
    /// On timeout the dispatch keeps running in the background and a failed
    /// result is returned to the caller.
    pub async fn publish_and_wait(
        &self,
        event: Event,
        timeout: Duration,
    ) -> EventProcessingResult {
        let (tx, rx) = oneshot::channel();
        let enqueue = self.enqueue(event, Some(tx)).await;
        if !enqueue.success {
            return enqueue;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => {
                let mut result = enqueue;
                result.success = false;
                result
                    .errors
                    .push(EventError::NotRunning.to_string());
                result
            }
            Err(_elapsed) => {
                let mut result = enqueue;
                result.success = false;
                result.errors.push(
                    EventError::WaitTimeout {
                        duration_ms: timeout.as_millis() as u64,
                    }
                    .to_string(),
                );
                result
            }
        }
    }

    async fn enqueue(
        &self,
        event: Event,
        completion: Option<oneshot::Sender<EventProcessingResult>>,
    ) -> EventProcessingResult {
        self.start();

        if self.config.store_events {
            self.store.store_event(&event);
        }

        let priority = event.metadata.priority;
        let sender = {
            let lanes = self.lanes.lock();
            // start() above guarantees the lanes exist
            lanes.as_ref().map(|l| l.senders[priority.lane()].clone())
        };
        let Some(sender) = sender else {
            return EventProcessingResult::failure(&event, EventError::NotRunning.to_string());
        };

        let enqueued = EventProcessingResult::enqueued(&event);
        tracing::trace!(
            event_id = %event.metadata.event_id,
            event_type = %event.event_type,
            lane = priority.as_str(),
            "enqueueing event"
        );

        match sender.try_send(QueuedEvent { event, completion }) {
            Ok(()) => enqueued,
            Err(mpsc::error::TrySendError::Full(queued)) => {
                let error = EventError::QueueFull {
                    priority,
                    capacity: self.config.queue_capacity,
                };
                self.sink
                    .report(
                        &error,
                        ErrorContext::operation("publish").with_event(
                            queued.event.metadata.event_id,
                            queued.event.event_type.clone(),
                        ),
                    )
                    .await;
                EventProcessingResult::failure(&queued.event, error.to_string())
            }
            Err(mpsc::error::TrySendError::Closed(queued)) => {
                let error = EventError::NotRunning;
                self.sink
                    .report(
                        &error,
                        ErrorContext::operation("publish").with_event(
                            queued.event.metadata.event_id,
                            queued.event.event_type.clone(),
                        ),
                    )
                    .await;
                EventProcessingResult::failure(&queued.event, error.to_string())
            }
        }
    }

    /// Republish stored events matching the criteria as derived copies.
    ///
    /// Copies carry a fresh event id, `source = "event_replay"`, priority
    /// [`EventPriority::Low`], and a causation link to the original event.
    /// Returns the number of events republished.
    pub async fn replay_events(
        &self,
        event_type: Option<&str>,
        correlation_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> usize {
        let originals = self.store.select(event_type, correlation_id, from, to);
        let mut replayed = 0;

        for original in originals {
            let mut copy = Event::new(original.event_type.clone(), original.payload.clone())
                .with_source(REPLAY_SOURCE)
                .with_priority(EventPriority::Low)
                .with_causation_id(original.metadata.event_id);
            if let Some(correlation) = original.metadata.correlation_id {
                copy = copy.with_correlation_id(correlation);
            }

            if self.publish(copy).await.success {
                replayed += 1;
            }
        }

        tracing::info!(
            count = replayed,
            event_type = ?event_type,
            correlation_id = ?correlation_id,
            "events replayed"
        );
        replayed
    }

    /// Snapshot bus-wide statistics
    pub fn statistics(&self) -> BusStatistics {
        BusStatistics {
            processing: self.stats.processing(),
            event_metrics: self.stats.event_metrics(),
            handler_count: self.registry.handler_count(),
            global_handler_count: self.registry.global_handler_count(),
            circuit_breakers: self.breakers.snapshot(),
            dead_letter_queue_size: self.dead_letters.len(),
            event_store_size: self.store.len(),
        }
    }

    /// Current dead-letter entries, oldest first
    pub fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.entries()
    }

    /// The bounded event store backing replay and inspection
    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.store
    }
}
