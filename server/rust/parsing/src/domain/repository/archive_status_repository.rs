use async_trait::async_trait;

/// ArchiveStatusRepository はアーカイブの処理状態を更新する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveStatusRepository: Send + Sync {
    async fn mark_processed(&self, archive_id: &str, message_count: usize) -> anyhow::Result<()>;

    async fn mark_failed(&self, archive_id: &str, error_message: &str) -> anyhow::Result<()>;
}
