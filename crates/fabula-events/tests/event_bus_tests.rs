//! End-to-end event bus tests: delivery, priority lanes, circuit breaking,
//! dead-lettering, and replay

use fabula_events::{
    CircuitBreakerBank, Event, EventBus, EventBusConfig, EventHandler, EventPriority, EventResult,
    SubscribeOptions, REPLAY_SOURCE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handler that counts invocations, records events, and can be told to
/// fail or stall
struct TestHandler {
    name: String,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
    seen: Mutex<Vec<Event>>,
}

impl TestHandler {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        let handler = Self::new(name);
        handler.failing.store(true, Ordering::SeqCst);
        handler
    }

    fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Some(delay),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for TestHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> EventResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(event.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(fabula_events::EventError::handler_failed(
                self.name.as_str(),
                "induced failure",
            ))
        } else {
            Ok(())
        }
    }
}

fn bus_with(config: EventBusConfig) -> EventBus {
    // Safe to call from every test; only the first registration wins
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    EventBus::new(config)
}

fn default_bus() -> EventBus {
    bus_with(EventBusConfig::default())
}

#[tokio::test]
async fn each_matching_registration_delivers_once() {
    let bus = default_bus();
    let handler = TestHandler::new("recorder");

    // Duplicate registrations produce duplicate deliveries by design
    bus.subscribe("turn.completed", handler.clone(), SubscribeOptions::default());
    bus.subscribe("turn.completed", handler.clone(), SubscribeOptions::default());

    let result = bus
        .publish_and_wait(
            Event::new("turn.completed", json!({"turn": 1})),
            Duration::from_secs(5),
        )
        .await;

    assert!(result.success);
    assert_eq!(handler.calls(), 2);
    let seen = handler.seen.lock();
    assert!(seen.iter().all(|event| event.payload == json!({"turn": 1})));
    bus.stop().await;
}

#[tokio::test]
async fn unrelated_event_types_are_not_delivered() {
    let bus = default_bus();
    let handler = TestHandler::new("recorder");
    bus.subscribe("turn.completed", handler.clone(), SubscribeOptions::default());

    bus.publish_and_wait(Event::new("persona.decision", json!({})), Duration::from_secs(5))
        .await;

    assert_eq!(handler.calls(), 0);
    bus.stop().await;
}

#[tokio::test]
async fn critical_events_bypass_low_priority_backlog() {
    let bus = default_bus();
    let low_handler = TestHandler::slow("low-consumer", Duration::from_secs(30));
    let critical_handler = TestHandler::new("critical-consumer");

    bus.subscribe("background.tick", low_handler.clone(), SubscribeOptions::default());
    bus.subscribe("alarm.raised", critical_handler.clone(), SubscribeOptions::default());

    // Backlog the LOW lane behind a stalled handler
    for i in 0..3 {
        bus.publish(
            Event::new("background.tick", json!({"tick": i})).with_priority(EventPriority::Low),
        )
        .await;
    }

    // The CRITICAL lane has its own worker and is serviced immediately
    let result = bus
        .publish_and_wait(
            Event::new("alarm.raised", json!({})).with_priority(EventPriority::Critical),
            Duration::from_secs(5),
        )
        .await;

    assert!(result.success);
    assert_eq!(critical_handler.calls(), 1);
    bus.stop().await;
}

#[tokio::test]
async fn breaker_opens_after_five_failures_then_recovers_via_probe() {
    let config = EventBusConfig {
        breaker_recovery_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let bus = bus_with(config);
    let handler = TestHandler::failing("flaky");
    bus.subscribe("kb.sync", handler.clone(), SubscribeOptions::default());

    // Five consecutive failures open the circuit
    for _ in 0..5 {
        let result = bus
            .publish_and_wait(Event::new("kb.sync", json!({})), Duration::from_secs(5))
            .await;
        assert!(!result.success);
    }
    assert_eq!(handler.calls(), 5);

    // Sixth attempt inside the recovery window must not invoke the handler
    let result = bus
        .publish_and_wait(Event::new("kb.sync", json!({})), Duration::from_secs(5))
        .await;
    assert!(!result.success);
    assert_eq!(handler.calls(), 5);

    // After the window elapses the next dispatch is the half-open probe
    tokio::time::sleep(Duration::from_millis(150)).await;
    handler.failing.store(false, Ordering::SeqCst);
    let result = bus
        .publish_and_wait(Event::new("kb.sync", json!({})), Duration::from_secs(5))
        .await;
    assert!(result.success);
    assert_eq!(handler.calls(), 6);

    // Probe success closed the breaker and reset its failure count
    let key = CircuitBreakerBank::key("flaky", "kb.sync");
    let stats = bus.statistics();
    assert_eq!(stats.circuit_breakers[&key].failure_count, 0);

    let result = bus
        .publish_and_wait(Event::new("kb.sync", json!({})), Duration::from_secs(5))
        .await;
    assert!(result.success);
    assert_eq!(handler.calls(), 7);
    bus.stop().await;
}

#[tokio::test]
async fn handler_failures_never_dead_letter() {
    let bus = default_bus();
    let handler = TestHandler::failing("always-fails");
    bus.subscribe("doomed", handler.clone(), SubscribeOptions::default());

    for _ in 0..10 {
        bus.publish_and_wait(Event::new("doomed", json!({})), Duration::from_secs(5))
            .await;
    }

    let stats = bus.statistics();
    assert_eq!(stats.processing.failed_events, 10);
    assert!(bus.dead_letter_entries().is_empty());
    assert_eq!(stats.dead_letter_queue_size, 0);
    bus.stop().await;
}

#[tokio::test]
async fn store_eviction_drops_oldest_event() {
    let config = EventBusConfig {
        store_capacity: 5,
        ..Default::default()
    };
    let bus = bus_with(config);

    let oldest = Event::new("t", json!(0));
    let oldest_id = oldest.metadata.event_id;
    bus.publish(oldest).await;
    for i in 1..6 {
        bus.publish(Event::new("t", json!(i))).await;
    }

    assert_eq!(bus.event_store().len(), 5);
    assert!(bus.event_store().get_event(oldest_id).is_none());
    bus.stop().await;
}

#[tokio::test]
async fn replay_by_correlation_links_copies_to_originals() {
    let bus = default_bus();
    let correlation = uuid::Uuid::new_v4();
    let other = uuid::Uuid::new_v4();

    let first = Event::new("scene.change", json!({"n": 1})).with_correlation_id(correlation);
    let second = Event::new("scene.change", json!({"n": 2})).with_correlation_id(correlation);
    let original_ids = [first.metadata.event_id, second.metadata.event_id];
    bus.publish(first).await;
    bus.publish(second).await;
    bus.publish(Event::new("scene.change", json!({"n": 3})).with_correlation_id(other))
        .await;

    let replayed = bus.replay_events(None, Some(correlation), None, None).await;
    assert_eq!(replayed, 2);

    let copies: Vec<Event> = bus
        .event_store()
        .select(None, Some(correlation), None, None)
        .into_iter()
        .filter(|event| event.metadata.source == REPLAY_SOURCE)
        .collect();
    assert_eq!(copies.len(), 2);
    for copy in &copies {
        assert_eq!(copy.metadata.priority, EventPriority::Low);
        let causation = copy.metadata.causation_id.expect("causation link");
        assert!(original_ids.contains(&causation));
        assert!(!original_ids.contains(&copy.metadata.event_id));
    }
    bus.stop().await;
}

#[tokio::test]
async fn replay_filters_by_type() {
    let bus = default_bus();
    bus.publish(Event::new("a", json!(1))).await;
    bus.publish(Event::new("b", json!(2))).await;

    let replayed = bus.replay_events(Some("a"), None, None, None).await;
    assert_eq!(replayed, 1);
    bus.stop().await;
}

#[tokio::test]
async fn unsubscribed_handler_is_not_invoked() {
    let bus = default_bus();
    let handler = TestHandler::new("transient");
    let as_dyn: Arc<dyn EventHandler> = handler.clone();
    bus.subscribe("t", handler.clone(), SubscribeOptions::default());

    assert!(bus.unsubscribe("t", &as_dyn));
    bus.publish_and_wait(Event::new("t", json!({})), Duration::from_secs(5))
        .await;

    assert_eq!(handler.calls(), 0);
    assert!(!bus.unsubscribe("t", &as_dyn));
    bus.stop().await;
}

#[tokio::test]
async fn end_to_end_mixed_success_and_failure() {
    let bus = default_bus();
    let notifier = TestHandler::new("order-notifier");
    let audit = TestHandler::failing("audit-log");

    bus.subscribe(
        "order.created",
        notifier.clone(),
        SubscribeOptions::new().with_priority(10),
    );
    bus.subscribe_to_all(audit.clone(), SubscribeOptions::default());

    let result = bus
        .publish_and_wait(
            Event::new("order.created", json!({"order": 42})),
            Duration::from_secs(5),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.handler_results["order-notifier"], true);
    assert_eq!(result.handler_results["audit-log"], false);

    let stats = bus.statistics();
    assert_eq!(stats.processing.failed_events, 1);
    assert_eq!(stats.handler_count, 1);
    assert_eq!(stats.global_handler_count, 1);

    let key = CircuitBreakerBank::key("audit-log", "order.created");
    assert_eq!(stats.circuit_breakers[&key].failure_count, 1);
    bus.stop().await;
}

#[tokio::test]
async fn publish_and_wait_reports_handler_outcomes() {
    let bus = default_bus();
    let handler = TestHandler::slow("worker", Duration::from_millis(100));
    bus.subscribe("t", handler.clone(), SubscribeOptions::default());

    let result = bus
        .publish_and_wait(Event::new("t", json!({})), Duration::from_secs(5))
        .await;

    assert!(result.success);
    assert_eq!(result.handler_results["worker"], true);
    assert!(result.processing_time >= Duration::from_millis(100));
    bus.stop().await;
}

#[tokio::test]
async fn publish_and_wait_times_out_without_cancelling_dispatch() {
    let bus = default_bus();
    let handler = TestHandler::slow("slow-worker", Duration::from_millis(300));
    bus.subscribe("t", handler.clone(), SubscribeOptions::default());

    let result = bus
        .publish_and_wait(Event::new("t", json!({})), Duration::from_millis(20))
        .await;
    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("Timed out")));

    // The dispatch itself keeps running to completion
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handler.calls(), 1);
    bus.stop().await;
}

#[tokio::test]
async fn full_lane_rejects_publish_without_blocking() {
    let config = EventBusConfig {
        queue_capacity: 1,
        ..Default::default()
    };
    let bus = bus_with(config);
    let handler = TestHandler::slow("stalled", Duration::from_secs(30));
    bus.subscribe("t", handler.clone(), SubscribeOptions::default());

    // First event occupies the worker, the rest fill and overflow the lane
    let mut rejected = 0;
    for _ in 0..10 {
        let result = bus.publish(Event::new("t", json!({}))).await;
        if !result.success {
            assert!(result.errors[0].contains("full"));
            rejected += 1;
        }
    }
    assert!(rejected > 0);
    bus.stop().await;
}

/// Handler that tracks how many invocations overlap in time
struct GaugedHandler {
    name: String,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GaugedHandler {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventHandler for GaugedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> EventResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn max_concurrent_of_one_serializes_cross_lane_invocations() {
    let bus = default_bus();
    let handler = GaugedHandler::new("serialized");
    bus.subscribe(
        "snapshot.write",
        handler.clone(),
        SubscribeOptions::new().with_max_concurrent(1),
    );

    // Two lanes dispatch the same registration concurrently; the permit
    // forces the invocations to run one at a time
    bus.publish(Event::new("snapshot.write", json!({})).with_priority(EventPriority::Low))
        .await;
    bus.publish(Event::new("snapshot.write", json!({})).with_priority(EventPriority::High))
        .await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
    bus.stop().await;
}

#[tokio::test]
async fn metrics_track_per_event_type() {
    let bus = default_bus();
    let handler = TestHandler::new("h");
    bus.subscribe("a", handler.clone(), SubscribeOptions::default());

    for _ in 0..3 {
        bus.publish_and_wait(Event::new("a", json!({})), Duration::from_secs(5))
            .await;
    }

    let stats = bus.statistics();
    let metrics = &stats.event_metrics["a"];
    assert_eq!(metrics.count, 3);
    assert_eq!(metrics.success_rate, 1.0);
    assert!(metrics.last_processed.is_some());
    assert_eq!(stats.processing.handlers_executed, 3);
    bus.stop().await;
}
