/// MessagingError はメッセージング操作に関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("publish error: {0}")]
    PublishError(String),

    #[error("consume error: {0}")]
    ConsumeError(String),

    #[error("ack error: {0}")]
    AckError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("invalid binding pattern: {0}")]
    InvalidBinding(String),

    #[error("event type mismatch: expected {expected}, got {actual}")]
    EventTypeMismatch { expected: String, actual: String },
}
