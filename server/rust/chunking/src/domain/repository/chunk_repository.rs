use async_trait::async_trait;
use copilot_document_store::InsertOutcome;

use crate::domain::entity::Chunk;

/// ChunkRepository はチャンクの永続化を担う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// チャンクを保存する。同一 ID が既にあれば AlreadyExists を返す。
    async fn save(&self, chunk: &Chunk) -> anyhow::Result<InsertOutcome>;
}
