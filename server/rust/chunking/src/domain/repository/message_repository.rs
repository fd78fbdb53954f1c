use async_trait::async_trait;

use crate::domain::entity::Message;

/// MessageRepository は parsing サービスが保存したメッセージを読み出す。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_id(&self, message_doc_id: &str) -> anyhow::Result<Option<Message>>;
}
