use std::sync::Arc;

use async_trait::async_trait;
use copilot_document_store::{insert_idempotent, DocumentStore, Filter, InsertOutcome};
use copilot_telemetry::Metrics;

use super::MESSAGES_COLLECTION;
use crate::domain::entity::MessageDocument;
use crate::domain::repository::MessageRepository;

/// MessageDocumentRepository は messages コレクションを使う MessageRepository 実装。
pub struct MessageDocumentRepository {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<Metrics>>,
}

impl MessageDocumentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl MessageRepository for MessageDocumentRepository {
    async fn save(&self, message: &MessageDocument) -> anyhow::Result<InsertOutcome> {
        let document = serde_json::to_value(message)?;
        let outcome = insert_idempotent(
            self.store.as_ref(),
            MESSAGES_COLLECTION,
            &message.message_doc_id,
            document,
        )
        .await?;
        if outcome == InsertOutcome::AlreadyExists {
            if let Some(ref metrics) = self.metrics {
                metrics.record_duplicate_write(MESSAGES_COLLECTION);
            }
        }
        Ok(outcome)
    }

    async fn count_by_archive(&self, archive_id: &str) -> anyhow::Result<usize> {
        let mut filter = Filter::new();
        filter.insert("archive_id".to_string(), serde_json::json!(archive_id));
        let count = self.store.count(MESSAGES_COLLECTION, &filter).await?;
        Ok(usize::try_from(count)?)
    }
}
