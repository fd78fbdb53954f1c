use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use copilot_document_store::DocumentStore;
use serde_json::json;

use super::ARCHIVES_COLLECTION;
use crate::domain::repository::ArchiveStatusRepository;

/// ArchiveStatusDocumentRepository は archives コレクションの status を部分更新する。
pub struct ArchiveStatusDocumentRepository {
    store: Arc<dyn DocumentStore>,
}

impl ArchiveStatusDocumentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArchiveStatusRepository for ArchiveStatusDocumentRepository {
    async fn mark_processed(&self, archive_id: &str, message_count: usize) -> anyhow::Result<()> {
        self.store
            .update(
                ARCHIVES_COLLECTION,
                archive_id,
                json!({
                    "status": "processed",
                    "message_count": message_count,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, archive_id: &str, error_message: &str) -> anyhow::Result<()> {
        self.store
            .update(
                ARCHIVES_COLLECTION,
                archive_id,
                json!({
                    "status": "failed",
                    "error_message": error_message,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_document_store::InMemoryDocumentStore;

    #[tokio::test]
    async fn test_mark_processed_updates_status_and_count() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(ARCHIVES_COLLECTION, "a1", json!({"status": "pending", "source": "s"}))
            .await
            .unwrap();
        let repo = ArchiveStatusDocumentRepository::new(store.clone());

        repo.mark_processed("a1", 3).await.unwrap();
        let doc = store.get(ARCHIVES_COLLECTION, "a1").await.unwrap().unwrap();
        assert_eq!(doc["status"], "processed");
        assert_eq!(doc["message_count"], 3);
        assert_eq!(doc["source"], "s");
    }

    #[tokio::test]
    async fn test_mark_failed_on_missing_archive_is_error() {
        let repo = ArchiveStatusDocumentRepository::new(Arc::new(InMemoryDocumentStore::new()));
        assert!(repo.mark_failed("missing", "boom").await.is_err());
    }
}
