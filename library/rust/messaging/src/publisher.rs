use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MessagingError;
use crate::event::{Event, EventEnvelope};

/// DeliveryMode はブローカー側でのメッセージ保持方式を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// ブローカー再起動で失われる
    Transient,
    /// 永続キューに保存され、ブローカー再起動後も残る
    Persistent,
}

/// EventPublisher はトピックエクスチェンジへのイベント発行インターフェース。
///
/// 実装は必ず `DeliveryMode::Persistent` で発行する。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 指定したルーティングキーでイベントを発行する。ブローカーエラーは呼び出し元へ返す。
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), MessagingError>;
}

/// 型付きイベントをエンベロープに包み、イベント種別のルーティングキーで発行する。
/// 発行したエンベロープを返す。
pub async fn publish_event<E: Event>(
    publisher: &dyn EventPublisher,
    event: &E,
) -> Result<EventEnvelope, MessagingError> {
    let envelope = EventEnvelope::from_event(event)?;
    publisher
        .publish(E::EVENT_TYPE.routing_key(), &envelope)
        .await?;
    Ok(envelope)
}

/// NoOpEventPublisher はテスト・スタブ用の何もしないパブリッシャー実装。
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(
        &self,
        _routing_key: &str,
        _envelope: &EventEnvelope,
    ) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::JsonParsed;

    #[tokio::test]
    async fn test_noop_publisher_publish() {
        let publisher = NoOpEventPublisher;
        let event = JsonParsed::single("arc", "msg", "thread", 0.1);
        let result = publish_event(&publisher, &event).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_event_uses_event_routing_key() {
        let mut mock = MockEventPublisher::new();
        mock.expect_publish()
            .withf(|key, envelope| key == "json.parsed" && envelope.event_type == "JSONParsed")
            .times(1)
            .returning(|_, _| Ok(()));

        let event = JsonParsed::single("arc", "msg", "thread", 0.1);
        let envelope = publish_event(&mock, &event).await.unwrap();
        assert_eq!(envelope.data["archive_id"], "arc");
    }

    #[tokio::test]
    async fn test_publish_event_propagates_broker_error() {
        let mut mock = MockEventPublisher::new();
        mock.expect_publish()
            .returning(|_, _| Err(MessagingError::PublishError("broker down".to_string())));

        let event = JsonParsed::single("arc", "msg", "thread", 0.1);
        let result = publish_event(&mock, &event).await;
        assert!(matches!(result, Err(MessagingError::PublishError(_))));
    }
}
