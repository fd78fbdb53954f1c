//! copilot-messaging: 永続メッセージバスの抽象化ライブラリ。
//!
//! トピックエクスチェンジ `copilot.events` へのイベント発行と、
//! 手動 ack 付きの永続キュー購読、冪等コンシューマー向けの処理ループを提供する。
//! 配信は at-least-once であり、コンシューマーは自身の出力を永続化してから ack する。

pub mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod memory;
pub mod processor;
pub mod publisher;
pub mod routing;

#[cfg(feature = "kafka")]
pub mod kafka_publisher;
#[cfg(feature = "kafka")]
pub mod kafka_subscriber;

pub use backend::{connect, MessagingClients};
pub use config::{ConsumerConfig, MessagingBackend, MessagingConfig, DEFAULT_EXCHANGE};
pub use consumer::{Delivery, EventSubscriber};
pub use error::MessagingError;
pub use event::{
    ArchiveIngested, ChunkingFailed, ChunksPrepared, Event, EventEnvelope, EventType, JsonParsed,
    ParsingFailed,
};
pub use memory::{InMemoryBroker, InMemorySubscriber, QueueDepth};
pub use processor::{EventHandler, EventProcessor, HandlerError, OutcomeRecorder, ProcessOutcome};
pub use publisher::{publish_event, DeliveryMode, EventPublisher, NoOpEventPublisher};

#[cfg(feature = "kafka")]
pub use kafka_publisher::KafkaEventPublisher;
#[cfg(feature = "kafka")]
pub use kafka_subscriber::KafkaEventSubscriber;

#[cfg(feature = "mock")]
pub use consumer::MockEventSubscriber;
#[cfg(feature = "mock")]
pub use processor::MockEventHandler;
#[cfg(feature = "mock")]
pub use publisher::MockEventPublisher;
