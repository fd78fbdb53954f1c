use async_trait::async_trait;
use copilot_document_store::InsertOutcome;

use crate::domain::entity::MessageDocument;

/// MessageRepository は解析済みメッセージの永続化を担う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// メッセージを保存する。同一 ID が既にあれば AlreadyExists を返す。
    async fn save(&self, message: &MessageDocument) -> anyhow::Result<InsertOutcome>;

    /// アーカイブに属する保存済みメッセージ数を返す。
    async fn count_by_archive(&self, archive_id: &str) -> anyhow::Result<usize>;
}
