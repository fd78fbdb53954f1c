use std::sync::Arc;

use chrono::Utc;
use copilot_document_store::InsertOutcome;
use copilot_messaging::{
    publish_event, ChunkingFailed, ChunksPrepared, EventPublisher, JsonParsed, MessagingError,
};

use crate::domain::entity::chunk::chunk_id;
use crate::domain::entity::{Chunk, Message};
use crate::domain::repository::{ChunkRepository, MessageRepository};
use crate::domain::service::chunker::{WordWindowChunker, STRATEGY_NAME};

/// ChunkSummary は JSONParsed 1 件分のチャンク化結果。
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    pub chunk_ids: Vec<String>,
    pub inserted: usize,
    pub already_present: usize,
    pub avg_chunk_size_tokens: f64,
}

/// ChunkError は再配信で回復し得る失敗を表す。
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// parsing 側の書き込みがまだ見えていない可能性がある
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("document store error: {0}")]
    Store(anyhow::Error),
    #[error("failed to publish event: {0}")]
    Publish(#[from] MessagingError),
}

impl ChunkError {
    /// ChunkingFailed の error_type に載せる名前。
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MessageNotFound(_) => "MessageNotFound",
            Self::Store(_) => "DocumentStoreError",
            Self::Publish(_) => "PublishError",
        }
    }
}

/// ChunkMessagesUseCase は JSONParsed が指すメッセージをチャンクに分割して保存する。
pub struct ChunkMessagesUseCase {
    messages: Arc<dyn MessageRepository>,
    chunks: Arc<dyn ChunkRepository>,
    publisher: Arc<dyn EventPublisher>,
    chunker: WordWindowChunker,
}

impl ChunkMessagesUseCase {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        chunks: Arc<dyn ChunkRepository>,
        publisher: Arc<dyn EventPublisher>,
        chunker: WordWindowChunker,
    ) -> Self {
        Self {
            messages,
            chunks,
            publisher,
            chunker,
        }
    }

    /// 全チャンクの保存後に ChunksPrepared を発行する。
    ///
    /// チャンク ID は決定的なので、再配信時は既存チャンクとして数えるだけで件数は増えない。
    pub async fn execute(&self, event: &JsonParsed) -> Result<ChunkSummary, ChunkError> {
        let mut chunk_ids = Vec::new();
        let mut inserted = 0;
        let mut already_present = 0;
        let mut total_tokens = 0;

        for message_doc_id in &event.parsed_message_ids {
            let message = self
                .messages
                .find_by_id(message_doc_id)
                .await
                .map_err(ChunkError::Store)?
                .ok_or_else(|| ChunkError::MessageNotFound(message_doc_id.clone()))?;

            for chunk in self.build_chunks(&message) {
                match self.chunks.save(&chunk).await.map_err(ChunkError::Store)? {
                    InsertOutcome::Inserted => inserted += 1,
                    InsertOutcome::AlreadyExists => already_present += 1,
                }
                total_tokens += chunk.token_count;
                chunk_ids.push(chunk.chunk_id);
            }
        }

        let chunk_count = chunk_ids.len();
        let avg_chunk_size_tokens = if chunk_count == 0 {
            0.0
        } else {
            total_tokens as f64 / chunk_count as f64
        };
        let prepared = ChunksPrepared {
            message_doc_ids: event.parsed_message_ids.clone(),
            chunk_count,
            chunk_ids: chunk_ids.clone(),
            chunks_ready: chunk_count > 0,
            chunking_strategy: STRATEGY_NAME.to_string(),
            avg_chunk_size_tokens,
        };
        publish_event(self.publisher.as_ref(), &prepared).await?;

        tracing::info!(
            archive_id = %event.archive_id,
            message_count = event.parsed_message_ids.len(),
            chunk_count,
            inserted,
            already_present,
            "chunks prepared"
        );
        Ok(ChunkSummary {
            chunk_ids,
            inserted,
            already_present,
            avg_chunk_size_tokens,
        })
    }

    /// ChunkingFailed を発行する。
    pub async fn report_failure(
        &self,
        event: &JsonParsed,
        error_type: &str,
        error_message: &str,
        retry_count: u32,
    ) -> Result<(), MessagingError> {
        tracing::error!(
            archive_id = %event.archive_id,
            error_type,
            error = error_message,
            retry_count,
            "chunking failed"
        );
        let failed = ChunkingFailed {
            message_doc_ids: event.parsed_message_ids.clone(),
            error_message: error_message.to_string(),
            error_type: error_type.to_string(),
            retry_count,
        };
        publish_event(self.publisher.as_ref(), &failed).await?;
        Ok(())
    }

    fn build_chunks(&self, message: &Message) -> Vec<Chunk> {
        let now = Utc::now();
        self.chunker
            .split(&message.body_normalized)
            .into_iter()
            .enumerate()
            .map(|(index, window)| Chunk {
                chunk_id: chunk_id(&message.message_doc_id, index),
                message_doc_id: message.message_doc_id.clone(),
                message_id: message.message_id.clone(),
                thread_id: message.thread_id.clone(),
                archive_id: message.archive_id.clone(),
                chunk_index: index,
                token_count: window.token_count(),
                start_offset: window.start,
                end_offset: window.end,
                text: window.text,
                embedding_generated: false,
                created_at: now,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::chunk_repository::MockChunkRepository;
    use crate::domain::repository::message_repository::MockMessageRepository;
    use crate::domain::service::ChunkerConfig;
    use copilot_messaging::MockEventPublisher;

    fn chunker() -> WordWindowChunker {
        WordWindowChunker::new(ChunkerConfig {
            chunk_size: 4,
            chunk_overlap: 1,
            min_chunk_size: 2,
        })
        .unwrap()
    }

    fn message(id: &str, body: &str) -> Message {
        Message {
            message_doc_id: id.to_string(),
            archive_id: "arc1".to_string(),
            message_id: format!("{id}@x"),
            thread_id: "t1".to_string(),
            body_normalized: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_chunks_are_saved_and_announced() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(message(id, "one two three four five six seven"))));
        let mut chunks = MockChunkRepository::new();
        chunks
            .expect_save()
            .withf(|chunk| chunk.message_doc_id == "m1" && !chunk.embedding_generated)
            .times(2)
            .returning(|_| Ok(InsertOutcome::Inserted));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, envelope| {
                key == "chunks.prepared"
                    && envelope.data["chunk_count"] == 2
                    && envelope.data["chunks_ready"] == true
                    && envelope.data["chunking_strategy"] == "token_window"
                    && envelope.data["avg_chunk_size_tokens"] == 4.0
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let uc = ChunkMessagesUseCase::new(
            Arc::new(messages),
            Arc::new(chunks),
            Arc::new(publisher),
            chunker(),
        );
        let summary = uc
            .execute(&JsonParsed::single("arc1", "m1", "t1", 0.1))
            .await
            .unwrap();
        assert_eq!(summary.chunk_ids, vec![chunk_id("m1", 0), chunk_id("m1", 1)]);
        assert_eq!(summary.inserted, 2);
    }

    #[tokio::test]
    async fn test_existing_chunks_are_still_announced() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(message(id, "short body"))));
        let mut chunks = MockChunkRepository::new();
        chunks
            .expect_save()
            .returning(|_| Ok(InsertOutcome::AlreadyExists));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, envelope| key == "chunks.prepared" && envelope.data["chunk_count"] == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let uc = ChunkMessagesUseCase::new(
            Arc::new(messages),
            Arc::new(chunks),
            Arc::new(publisher),
            chunker(),
        );
        let summary = uc
            .execute(&JsonParsed::single("arc1", "m1", "t1", 0.1))
            .await
            .unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.already_present, 1);
    }

    #[tokio::test]
    async fn test_empty_body_announces_not_ready() {
        let mut messages = MockMessageRepository::new();
        messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(message(id, ""))));
        let mut chunks = MockChunkRepository::new();
        chunks.expect_save().never();
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, envelope| {
                envelope.data["chunk_count"] == 0
                    && envelope.data["chunks_ready"] == false
                    && envelope.data["avg_chunk_size_tokens"] == 0.0
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let uc = ChunkMessagesUseCase::new(
            Arc::new(messages),
            Arc::new(chunks),
            Arc::new(publisher),
            chunker(),
        );
        assert!(uc
            .execute(&JsonParsed::single("arc1", "m1", "t1", 0.1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_message_is_error_without_publish() {
        let mut messages = MockMessageRepository::new();
        messages.expect_find_by_id().returning(|_| Ok(None));
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();

        let uc = ChunkMessagesUseCase::new(
            Arc::new(messages),
            Arc::new(MockChunkRepository::new()),
            Arc::new(publisher),
            chunker(),
        );
        let err = uc
            .execute(&JsonParsed::single("arc1", "m1", "t1", 0.1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::MessageNotFound(ref id) if id == "m1"));
        assert_eq!(err.error_type(), "MessageNotFound");
    }

    #[tokio::test]
    async fn test_report_failure_publishes_chunking_failed() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, envelope| {
                key == "chunking.failed"
                    && envelope.data["retry_count"] == 5
                    && envelope.data["message_doc_ids"][0] == "m1"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let uc = ChunkMessagesUseCase::new(
            Arc::new(MockMessageRepository::new()),
            Arc::new(MockChunkRepository::new()),
            Arc::new(publisher),
            chunker(),
        );
        uc.report_failure(
            &JsonParsed::single("arc1", "m1", "t1", 0.1),
            "MessageNotFound",
            "message not found: m1",
            5,
        )
        .await
        .unwrap();
    }
}
