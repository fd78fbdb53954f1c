use std::sync::Arc;

use async_trait::async_trait;
use copilot_document_store::DocumentStore;

use super::MESSAGES_COLLECTION;
use crate::domain::entity::Message;
use crate::domain::repository::MessageRepository;

/// MessageDocumentRepository は messages コレクションからメッセージを読む。
pub struct MessageDocumentRepository {
    store: Arc<dyn DocumentStore>,
}

impl MessageDocumentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageRepository for MessageDocumentRepository {
    async fn find_by_id(&self, message_doc_id: &str) -> anyhow::Result<Option<Message>> {
        match self.store.get(MESSAGES_COLLECTION, message_doc_id).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_document_store::InMemoryDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_find_by_id() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(
                MESSAGES_COLLECTION,
                "m1",
                json!({
                    "message_doc_id": "m1",
                    "archive_id": "a1",
                    "message_id": "1@x",
                    "thread_id": "1@x",
                    "subject": "hello",
                    "body_normalized": "body text",
                }),
            )
            .await
            .unwrap();
        let repo = MessageDocumentRepository::new(store);

        let message = repo.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(message.archive_id, "a1");
        assert_eq!(message.body_normalized, "body text");
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_document_is_error() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(MESSAGES_COLLECTION, "m1", json!({"subject": "no ids"}))
            .await
            .unwrap();
        let repo = MessageDocumentRepository::new(store);
        assert!(repo.find_by_id("m1").await.is_err());
    }
}
