//! Where accepted events go.

use async_trait::async_trait;
use tracing::debug;

use intentflow_core::EventSource;
use intentflow_engine::Pipeline;

/// Receives every event a monitor accepts.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch(&self, event: EventSource);
}

#[async_trait]
impl EventSink for Pipeline {
    async fn dispatch(&self, event: EventSource) {
        // Outcomes are logged by the pipeline; approval requests leave
        // through the engine's approval notifier.
        let outcome = self.process(&event).await;
        if let Some(result) = outcome.result()
            && result.requires_approval
        {
            debug!(
                event_id = %event.id,
                execution_id = ?result.execution_id,
                "event awaiting approval"
            );
        }
    }
}
