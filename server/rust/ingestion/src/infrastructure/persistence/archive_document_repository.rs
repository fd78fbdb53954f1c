use std::sync::Arc;

use async_trait::async_trait;
use copilot_document_store::{insert_idempotent, DocumentStore, InsertOutcome};
use copilot_telemetry::Metrics;

use crate::domain::entity::Archive;
use crate::domain::repository::ArchiveRepository;

pub const ARCHIVES_COLLECTION: &str = "archives";

/// ArchiveDocumentRepository は archives コレクションを使う ArchiveRepository 実装。
pub struct ArchiveDocumentRepository {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<Metrics>>,
}

impl ArchiveDocumentRepository {
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
impl ArchiveRepository for ArchiveDocumentRepository {
    async fn create(&self, archive: &Archive) -> anyhow::Result<InsertOutcome> {
        let document = serde_json::to_value(archive)?;
        let outcome = insert_idempotent(
            self.store.as_ref(),
            ARCHIVES_COLLECTION,
            &archive.archive_id,
            document,
        )
        .await?;
        if outcome == InsertOutcome::AlreadyExists {
            if let Some(ref metrics) = self.metrics {
                metrics.record_duplicate_write(ARCHIVES_COLLECTION);
            }
        }
        Ok(outcome)
    }

    async fn find_by_id(&self, archive_id: &str) -> anyhow::Result<Option<Archive>> {
        let document = self.store.get(ARCHIVES_COLLECTION, archive_id).await?;
        Ok(document.map(serde_json::from_value).transpose()?)
    }
}
