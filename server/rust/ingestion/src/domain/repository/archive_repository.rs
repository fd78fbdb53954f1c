use async_trait::async_trait;
use copilot_document_store::InsertOutcome;

use crate::domain::entity::Archive;

/// ArchiveRepository はアーカイブ記録の永続化を担う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    /// アーカイブを登録する。同一 ID が既にあれば AlreadyExists を返す。
    async fn create(&self, archive: &Archive) -> anyhow::Result<InsertOutcome>;

    async fn find_by_id(&self, archive_id: &str) -> anyhow::Result<Option<Archive>>;
}
