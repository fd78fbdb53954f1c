//! KafkaEventSubscriber: rdkafka を使用した EventSubscriber 実装。
//! feature = "kafka" で有効化される。
//!
//! 自動コミットは無効化し、ack でオフセットを同期コミットする。
//! 再キュー付き nack は該当オフセットへ seek して再配信させる。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::config::{ConsumerConfig, MessagingConfig};
use crate::consumer::{Delivery, EventSubscriber};
use crate::error::MessagingError;
use crate::routing::{binding_to_topic_regex, routing_key_from_topic};

type PartitionOffset = (String, i32, i64);

/// KafkaEventSubscriber は rdkafka の StreamConsumer を使った実装。
pub struct KafkaEventSubscriber {
    consumer: StreamConsumer,
    exchange: String,
    next_tag: AtomicU64,
    /// 配信タグ → (トピック, パーティション, オフセット)
    inflight: Mutex<HashMap<u64, PartitionOffset>>,
    /// (トピック, パーティション, オフセット) → 配信回数
    attempts: Mutex<HashMap<PartitionOffset, u32>>,
    seek_timeout: std::time::Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KafkaEventSubscriber {
    /// 新しい KafkaEventSubscriber を生成し、バインディングに対応するトピックを購読する。
    pub fn new(
        config: &MessagingConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, MessagingError> {
        config.validate()?;
        consumer_config.validate()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers_string())
            .set("group.id", consumer_config.group_id())
            .set("security.protocol", &config.security_protocol)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| MessagingError::ConnectionError(e.to_string()))?;

        let patterns = consumer_config
            .bindings
            .iter()
            .map(|b| binding_to_topic_regex(&config.exchange, b))
            .collect::<Result<Vec<_>, _>>()?;
        let topics: Vec<&str> = patterns.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| MessagingError::ConnectionError(e.to_string()))?;

        tracing::info!(
            group = %consumer_config.group_id(),
            topics = ?topics,
            "kafka event subscriber subscribed"
        );

        Ok(Self {
            consumer,
            exchange: config.exchange.clone(),
            next_tag: AtomicU64::new(1),
            inflight: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            seek_timeout: config.timeout(),
        })
    }

    fn take_inflight(&self, tag: u64) -> Result<PartitionOffset, MessagingError> {
        lock(&self.inflight)
            .remove(&tag)
            .ok_or(MessagingError::UnknownDeliveryTag(tag))
    }

    fn commit_past(&self, position: &PartitionOffset) -> Result<(), MessagingError> {
        let (topic, partition, offset) = position;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
            .map_err(|e| MessagingError::AckError(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| MessagingError::AckError(e.to_string()))?;
        lock(&self.attempts).remove(position);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for KafkaEventSubscriber {
    async fn receive(&self) -> Result<Delivery, MessagingError> {
        loop {
            let msg = self
                .consumer
                .recv()
                .await
                .map_err(|e| MessagingError::ConsumeError(e.to_string()))?;

            let Some(routing_key) = routing_key_from_topic(&self.exchange, msg.topic()) else {
                tracing::warn!(topic = %msg.topic(), "message from topic outside exchange skipped");
                continue;
            };

            let position: PartitionOffset =
                (msg.topic().to_string(), msg.partition(), msg.offset());
            let delivery_count = {
                let mut attempts = lock(&self.attempts);
                let count = attempts.entry(position.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            lock(&self.inflight).insert(tag, position);

            return Ok(Delivery {
                delivery_tag: tag,
                routing_key: routing_key.to_string(),
                payload: msg.payload().unwrap_or_default().to_vec(),
                redelivered: delivery_count > 1,
                delivery_count,
            });
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        let position = self.take_inflight(delivery.delivery_tag)?;
        self.commit_past(&position)
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError> {
        let position = self.take_inflight(delivery.delivery_tag)?;
        if !requeue {
            return self.commit_past(&position);
        }
        let (topic, partition, offset) = &position;
        self.consumer
            .seek(topic, *partition, Offset::Offset(*offset), self.seek_timeout)
            .map_err(|e| MessagingError::AckError(e.to_string()))?;
        tracing::debug!(
            topic = %topic,
            partition = *partition,
            offset = *offset,
            "partition rewound for redelivery"
        );
        Ok(())
    }
}
