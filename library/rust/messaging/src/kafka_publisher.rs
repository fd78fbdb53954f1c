//! KafkaEventPublisher: rdkafka を使用した EventPublisher 実装。
//! feature = "kafka" で有効化される。
//!
//! エクスチェンジとルーティングキーは `{exchange}.{routing_key}` のトピックに対応づける。
//! 永続配信は acks=all と冪等プロデューサーで担保する。

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::config::MessagingConfig;
use crate::error::MessagingError;
use crate::event::EventEnvelope;
use crate::publisher::EventPublisher;
use crate::routing::{topic_name, validate_routing_key};

/// KafkaEventPublisher は rdkafka の FutureProducer を使った実装。
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    exchange: String,
    timeout: std::time::Duration,
}

impl KafkaEventPublisher {
    /// MessagingConfig から KafkaEventPublisher を生成する。
    pub fn new(config: &MessagingConfig) -> Result<Self, MessagingError> {
        config.validate()?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers_string())
            .set("security.protocol", &config.security_protocol)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", config.timeout_ms.to_string())
            .create()
            .map_err(|e| MessagingError::ConnectionError(e.to_string()))?;

        tracing::info!(
            brokers = %config.brokers_string(),
            exchange = %config.exchange,
            "kafka event publisher initialized"
        );

        Ok(Self {
            producer,
            exchange: config.exchange.clone(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), MessagingError> {
        validate_routing_key(routing_key)?;
        let topic = topic_name(&self.exchange, routing_key);
        let payload = envelope.to_bytes()?;
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(envelope.event_type.as_str()),
            })
            .insert(Header {
                key: "event_id",
                value: Some(envelope.event_id.as_str()),
            });

        let record = FutureRecord::to(&topic)
            .key(&envelope.event_id)
            .payload(&payload)
            .headers(headers);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(err, _)| {
                MessagingError::PublishError(format!("failed to publish to {topic}: {err}"))
            })?;

        tracing::debug!(
            topic = %topic,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "event published"
        );
        Ok(())
    }
}
