//! Priority-lane dispatch: one worker per priority, concurrent fan-out per event

use crate::breaker::CircuitBreakerBank;
use crate::core::{Event, EventPriority};
use crate::dead_letter::DeadLetterQueue;
use crate::errors::{EventError, EventResult};
use crate::handler::HandlerRegistration;
use crate::registry::HandlerRegistry;
use crate::sink::{ErrorContext, ErrorSink};
use crate::stats::StatsCollector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outcome of dispatching (or enqueueing) one event
#[derive(Debug, Clone, Serialize)]
pub struct EventProcessingResult {
    pub event_id: Uuid,
    pub success: bool,
    /// Per-handler delivery outcome, keyed by handler name
    pub handler_results: HashMap<String, bool>,
    pub errors: Vec<String>,
    pub processing_time: Duration,
    pub retry_count: u32,
}

impl EventProcessingResult {
    /// Result describing a successful enqueue (handler outcomes unknown)
    pub fn enqueued(event: &Event) -> Self {
        Self {
            event_id: event.metadata.event_id,
            success: true,
            handler_results: HashMap::new(),
            errors: Vec::new(),
            processing_time: Duration::ZERO,
            retry_count: event.metadata.retry_count,
        }
    }

    /// Result describing a failure before any handler ran
    pub fn failure(event: &Event, error: impl Into<String>) -> Self {
        Self {
            event_id: event.metadata.event_id,
            success: false,
            handler_results: HashMap::new(),
            errors: vec![error.into()],
            processing_time: Duration::ZERO,
            retry_count: event.metadata.retry_count,
        }
    }
}

/// An event queued on a priority lane, with an optional completion channel
/// for publish-and-wait callers
pub(crate) struct QueuedEvent {
    pub event: Event,
    pub completion: Option<oneshot::Sender<EventProcessingResult>>,
}

/// Shared state every priority worker dispatches against
pub(crate) struct DispatchContext {
    pub registry: Arc<HandlerRegistry>,
    pub breakers: Arc<CircuitBreakerBank>,
    pub dead_letters: Arc<DeadLetterQueue>,
    pub stats: Arc<StatsCollector>,
    pub sink: Arc<dyn ErrorSink>,
}

/// Spawn the processing loop owning one priority lane.
///
/// The worker drains its own queue only, so a backlog on one lane never
/// delays another. Shutdown is cooperative via the watch channel; an event
/// mid-dispatch at cancellation time may be abandoned.
pub(crate) fn spawn_worker(
    priority: EventPriority,
    mut receiver: mpsc::Receiver<QueuedEvent>,
    mut shutdown: watch::Receiver<bool>,
    ctx: Arc<DispatchContext>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(lane = priority.as_str(), "priority worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                queued = receiver.recv() => {
                    let Some(QueuedEvent { event, completion }) = queued else {
                        break;
                    };
                    // Cancellation mid-dispatch abandons the in-flight
                    // fan-out; shutdown is best-effort, not transactional
                    tokio::select! {
                        result = dispatch_event(&event, &ctx) => {
                            if let Some(tx) = completion {
                                // Waiter may have timed out and dropped the receiver
                                let _ = tx.send(result);
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                tracing::debug!(
                                    lane = priority.as_str(),
                                    event_id = %event.metadata.event_id,
                                    "worker cancelled mid-dispatch"
                                );
                                break;
                            }
                        }
                    }
                }
            }
        }
        tracing::debug!(lane = priority.as_str(), "priority worker stopped");
    })
}

/// Dispatch one event to all applicable handlers and aggregate the outcome.
///
/// Individual handler failures are recorded per handler; only an error in
/// the orchestration itself moves the event to the dead-letter queue.
pub(crate) async fn dispatch_event(
    event: &Event,
    ctx: &Arc<DispatchContext>,
) -> EventProcessingResult {
    let started = Instant::now();

    if event.is_expired() {
        let error = EventError::EventExpired(event.metadata.event_id);
        tracing::debug!(event_id = %event.metadata.event_id, "dropping expired event");
        ctx.stats
            .record(&event.event_type, false, 0, started.elapsed());
        let mut result = EventProcessingResult::failure(event, error.to_string());
        result.processing_time = started.elapsed();
        return result;
    }

    match run_dispatch(event, ctx, started).await {
        Ok(result) => result,
        Err(error) => {
            ctx.sink
                .report(
                    &error,
                    ErrorContext::operation("dispatch_event")
                        .with_event(event.metadata.event_id, event.event_type.clone()),
                )
                .await;
            ctx.dead_letters.push(event.clone(), error.to_string());
            ctx.stats
                .record(&event.event_type, false, 0, started.elapsed());

            let mut result = EventProcessingResult::failure(event, error.to_string());
            result.processing_time = started.elapsed();
            result
        }
    }
}

async fn run_dispatch(
    event: &Event,
    ctx: &Arc<DispatchContext>,
    started: Instant,
) -> EventResult<EventProcessingResult> {
    let registrations = ctx.registry.applicable_handlers(event);

    let mut handler_results: HashMap<String, bool> = HashMap::new();
    let mut errors: Vec<String> = Vec::new();

    if registrations.is_empty() {
        tracing::trace!(
            event_id = %event.metadata.event_id,
            event_type = %event.event_type,
            "no applicable handlers"
        );
        ctx.stats
            .record(&event.event_type, true, 0, started.elapsed());
        return Ok(EventProcessingResult {
            event_id: event.metadata.event_id,
            success: true,
            handler_results,
            errors,
            processing_time: started.elapsed(),
            retry_count: event.metadata.retry_count,
        });
    }

    // Gate each handler through its breaker, then fan the rest out
    // concurrently. A handler timeout or error never cancels its siblings.
    let mut invocations: Vec<(String, JoinHandle<(String, Result<(), String>)>)> = Vec::new();
    for registration in registrations {
        let name = registration.handler.name().to_string();
        let key = CircuitBreakerBank::key(&name, &event.event_type);

        if !ctx.breakers.try_acquire(&key) {
            tracing::debug!(breaker = %key, "delivery short-circuited by open breaker");
            handler_results.insert(name.clone(), false);
            errors.push(EventError::CircuitBreakerOpen(key).to_string());
            continue;
        }

        invocations.push((
            name,
            spawn_invocation(registration, event.clone(), ctx.clone()),
        ));
    }

    let handlers_executed = invocations.len() as u64;
    let (names, handles): (Vec<_>, Vec<_>) = invocations.into_iter().unzip();
    let joined = futures::future::join_all(handles).await;

    for (name, joined) in names.into_iter().zip(joined) {
        match joined {
            Ok((name, Ok(()))) => {
                handler_results.insert(name, true);
            }
            Ok((name, Err(reason))) => {
                handler_results.insert(name, false);
                errors.push(reason);
            }
            Err(join_error) if join_error.is_panic() => {
                // A panicking handler is an ordinary handler failure
                let key = CircuitBreakerBank::key(&name, &event.event_type);
                ctx.breakers.record_failure(&key);
                let error = EventError::handler_failed(name.as_str(), "handler panicked");
                ctx.sink
                    .report(
                        &error,
                        ErrorContext::operation("handle_event")
                            .with_event(event.metadata.event_id, event.event_type.clone())
                            .with_handler(name.as_str()),
                    )
                    .await;
                handler_results.insert(name, false);
                errors.push(error.to_string());
            }
            Err(join_error) => {
                // Losing an invocation task is a dispatch-level failure
                return Err(EventError::dispatch_error(format!(
                    "fan-out task for handler '{name}' was lost: {join_error}"
                )));
            }
        }
    }

    let success = handler_results.values().all(|ok| *ok);
    ctx.stats
        .record(&event.event_type, success, handlers_executed, started.elapsed());

    Ok(EventProcessingResult {
        event_id: event.metadata.event_id,
        success,
        handler_results,
        errors,
        processing_time: started.elapsed(),
        retry_count: event.metadata.retry_count,
    })
}

/// Run one handler invocation as its own task, bounded by the registration's
/// timeout and concurrency limit
fn spawn_invocation(
    registration: HandlerRegistration,
    event: Event,
    ctx: Arc<DispatchContext>,
) -> JoinHandle<(String, Result<(), String>)> {
    tokio::spawn(async move {
        let name = registration.handler.name().to_string();
        let key = CircuitBreakerBank::key(&name, &event.event_type);

        let _permit = match registration.concurrency.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return (name, Err("concurrency limiter closed".to_string()));
            }
        };

        match tokio::time::timeout(registration.timeout, registration.handler.handle(&event)).await
        {
            Ok(Ok(())) => {
                ctx.breakers.record_success(&key);
                (name, Ok(()))
            }
            Ok(Err(handler_error)) => {
                ctx.breakers.record_failure(&key);
                let error = EventError::handler_failed(name.as_str(), handler_error.to_string());
                ctx.sink
                    .report(
                        &error,
                        ErrorContext::operation("handle_event")
                            .with_event(event.metadata.event_id, event.event_type.clone())
                            .with_handler(name.as_str()),
                    )
                    .await;
                (name, Err(error.to_string()))
            }
            Err(_elapsed) => {
                ctx.breakers.record_failure(&key);
                let error = EventError::handler_timeout(name.as_str(), registration.timeout);
                ctx.sink
                    .report(
                        &error,
                        ErrorContext::operation("handle_event")
                            .with_event(event.metadata.event_id, event.event_type.clone())
                            .with_handler(name.as_str()),
                    )
                    .await;
                (name, Err(error.to_string()))
            }
        }
    })
}
