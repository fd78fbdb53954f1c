use std::sync::Arc;

use crate::config::{ConsumerConfig, MessagingBackend, MessagingConfig};
use crate::consumer::EventSubscriber;
use crate::error::MessagingError;
use crate::memory::InMemoryBroker;
use crate::publisher::EventPublisher;

/// MessagingClients は設定から生成したパブリッシャーとサブスクライバーの組。
pub struct MessagingClients {
    pub publisher: Arc<dyn EventPublisher>,
    pub subscriber: Option<Arc<dyn EventSubscriber>>,
    /// backend = memory のときのみ保持する（テスト・開発モードでの検査用）
    pub broker: Option<Arc<InMemoryBroker>>,
}

/// 設定に応じてメッセージングクライアントを生成する。
///
/// consumer が指定された場合は永続キューを宣言（Kafka ではトピック購読）してサブスクライバーを返す。
pub fn connect(
    config: &MessagingConfig,
    consumer: Option<&ConsumerConfig>,
) -> Result<MessagingClients, MessagingError> {
    config.validate()?;
    if let Some(c) = consumer {
        c.validate()?;
    }

    match config.backend {
        MessagingBackend::Memory => {
            let broker = Arc::new(InMemoryBroker::new(config.exchange.clone()));
            let subscriber: Option<Arc<dyn EventSubscriber>> = match consumer {
                Some(c) => {
                    broker.declare_queue(&c.queue, &c.bindings)?;
                    Some(Arc::new(broker.subscribe(&c.queue)?))
                }
                None => None,
            };
            tracing::info!(exchange = %config.exchange, "using in-memory message broker");
            Ok(MessagingClients {
                publisher: broker.clone(),
                subscriber,
                broker: Some(broker),
            })
        }
        #[cfg(feature = "kafka")]
        MessagingBackend::Kafka => {
            let publisher = Arc::new(crate::kafka_publisher::KafkaEventPublisher::new(config)?);
            let subscriber: Option<Arc<dyn EventSubscriber>> = match consumer {
                Some(c) => Some(Arc::new(
                    crate::kafka_subscriber::KafkaEventSubscriber::new(config, c)?,
                )),
                None => None,
            };
            Ok(MessagingClients {
                publisher,
                subscriber,
                broker: None,
            })
        }
        #[cfg(not(feature = "kafka"))]
        MessagingBackend::Kafka => Err(MessagingError::ConfigurationError(
            "kafka backend requires the \"kafka\" feature".to_string(),
        )),
    }
}
