//! Error-reporting collaborator consumed by the bus

use crate::errors::EventError;
use async_trait::async_trait;
use uuid::Uuid;

/// Context attached to every error report
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: String,
    pub event_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub handler: Option<String>,
}

impl ErrorContext {
    /// Create context for a named bus operation
    pub fn operation(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Attach the event being processed
    pub fn with_event(mut self, event_id: Uuid, event_type: impl Into<String>) -> Self {
        self.event_id = Some(event_id);
        self.event_type = Some(event_type.into());
        self
    }

    /// Attach the handler involved
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }
}

/// Sink for publish-time and handler-level failures.
///
/// The bus reports and continues; severity classification and alerting are
/// the sink implementation's concern.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Report one failure with its context
    async fn report(&self, error: &EventError, context: ErrorContext);
}

/// Default sink that emits reports through `tracing`
pub struct TracingSink;

#[async_trait]
impl ErrorSink for TracingSink {
    async fn report(&self, error: &EventError, context: ErrorContext) {
        tracing::error!(
            component = "EventBus",
            operation = %context.operation,
            event_id = ?context.event_id,
            event_type = ?context.event_type,
            handler = ?context.handler,
            error = %error,
            "event bus failure"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Sink that records reports for assertions
    pub struct RecordingSink {
        pub reports: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl ErrorSink for RecordingSink {
        async fn report(&self, error: &EventError, context: ErrorContext) {
            self.reports
                .lock()
                .push((context.operation, error.to_string()));
        }
    }

    #[tokio::test]
    async fn test_context_builder() {
        let id = Uuid::new_v4();
        let context = ErrorContext::operation("dispatch")
            .with_event(id, "order.created")
            .with_handler("billing");

        assert_eq!(context.operation, "dispatch");
        assert_eq!(context.event_id, Some(id));
        assert_eq!(context.event_type.as_deref(), Some("order.created"));
        assert_eq!(context.handler.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_recording_sink_captures_reports() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            reports: reports.clone(),
        };
        sink.report(
            &EventError::dispatch_error("boom"),
            ErrorContext::operation("dispatch"),
        )
        .await;

        let captured = reports.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "dispatch");
        assert!(captured[0].1.contains("boom"));
    }
}
