use std::sync::Arc;

use async_trait::async_trait;
use copilot_document_store::{insert_idempotent, DocumentStore, InsertOutcome};
use copilot_telemetry::Metrics;

use super::CHUNKS_COLLECTION;
use crate::domain::entity::Chunk;
use crate::domain::repository::ChunkRepository;

/// ChunkDocumentRepository は chunks コレクションを使う ChunkRepository 実装。
pub struct ChunkDocumentRepository {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<Metrics>>,
}

impl ChunkDocumentRepository {
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
impl ChunkRepository for ChunkDocumentRepository {
    async fn save(&self, chunk: &Chunk) -> anyhow::Result<InsertOutcome> {
        let document = serde_json::to_value(chunk)?;
        let outcome =
            insert_idempotent(self.store.as_ref(), CHUNKS_COLLECTION, &chunk.chunk_id, document)
                .await?;
        if outcome == InsertOutcome::AlreadyExists {
            if let Some(ref metrics) = self.metrics {
                metrics.record_duplicate_write(CHUNKS_COLLECTION);
            }
        }
        Ok(outcome)
    }
}
