//! メッセージングの計装。
//! 処理結果の記録（OutcomeRecorder）と、発行数を数えるパブリッシャーラッパーを提供する。

use std::sync::Arc;

use async_trait::async_trait;
use copilot_messaging::{
    EventEnvelope, EventPublisher, MessagingError, OutcomeRecorder, ProcessOutcome,
};

use crate::metrics::Metrics;

impl OutcomeRecorder for Metrics {
    fn record(&self, routing_key: &str, outcome: ProcessOutcome) {
        self.record_event_consumed(routing_key, outcome.as_str());
    }
}

/// MeteredPublisher は発行の成否を events_published_total / events_publish_failures_total に記録する。
pub struct MeteredPublisher {
    inner: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl MeteredPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl EventPublisher for MeteredPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), MessagingError> {
        match self.inner.publish(routing_key, envelope).await {
            Ok(()) => {
                self.metrics.record_event_published(routing_key);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure(routing_key);
                Err(e)
            }
        }
    }
}
