//! Routes decoded events to handlers by signature.
//!
//! Signatures without a handler are ignored so that new event types on the stream do not
//! break older consumers.

use crate::envelope::InboundEvent;
use crate::reconciler::ReconcileError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Applies one event. Errors are reported and the event skipped; they never abort a batch.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &InboundEvent) -> Result<(), ReconcileError>;
}

/// Outcome of routing one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub handled: usize,
    pub ignored: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, signature: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(signature.into(), handler);
        self
    }

    /// Dispatch events sequentially, in batch order.
    pub async fn dispatch(&self, events: &[InboundEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            let Some(handler) = self.handlers.get(&event.signature) else {
                tracing::debug!(signature = %event.signature, "ignoring event with unhandled signature");
                report.ignored += 1;
                continue;
            };
            match handler.handle(event).await {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    tracing::warn!(
                        reason = %e,
                        signature = %event.signature,
                        block = ?event.block_number,
                        tx = ?event.transaction_hash,
                        "skipping event"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::MalformedEvent;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &InboundEvent) -> Result<(), ReconcileError> {
            let id = event.payload["id"].as_str().unwrap_or_default().to_string();
            if id == "bad" {
                return Err(MalformedEvent::new(&event.signature, "bad").into());
            }
            self.seen.lock().await.push(id);
            Ok(())
        }
    }

    fn ev(signature: &str, id: &str) -> InboundEvent {
        InboundEvent {
            signature: signature.into(),
            payload: json!({ "id": id }),
            block_number: None,
            transaction_hash: None,
        }
    }

    #[tokio::test]
    async fn dispatches_in_order_and_ignores_unknown() {
        let recorder = Arc::new(Recorder::default());
        let router = EventRouter::new().route("A()", recorder.clone());
        let report = router
            .dispatch(&[ev("A()", "1"), ev("Z()", "x"), ev("A()", "2"), ev("A()", "3")])
            .await;
        assert_eq!(
            report,
            BatchReport {
                handled: 3,
                ignored: 1,
                failed: 0
            }
        );
        assert_eq!(*recorder.seen.lock().await, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn failed_event_does_not_stop_batch() {
        let recorder = Arc::new(Recorder::default());
        let router = EventRouter::new().route("A()", recorder.clone());
        let report = router
            .dispatch(&[ev("A()", "1"), ev("A()", "bad"), ev("A()", "2")])
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.handled, 2);
        assert_eq!(*recorder.seen.lock().await, ["1", "2"]);
    }
}
