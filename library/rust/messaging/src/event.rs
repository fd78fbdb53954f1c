use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessagingError;

/// イベントエンベロープのスキーマバージョン。
pub const ENVELOPE_VERSION: &str = "1.0";

/// EventType はパイプラインで流れるイベント種別を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ArchiveIngested,
    JsonParsed,
    ParsingFailed,
    ChunksPrepared,
    ChunkingFailed,
}

impl EventType {
    /// エンベロープの event_type に載せる名前を返す。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArchiveIngested => "ArchiveIngested",
            Self::JsonParsed => "JSONParsed",
            Self::ParsingFailed => "ParsingFailed",
            Self::ChunksPrepared => "ChunksPrepared",
            Self::ChunkingFailed => "ChunkingFailed",
        }
    }

    /// イベント種別に対応するルーティングキーを返す。
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::ArchiveIngested => "archive.ingested",
            Self::JsonParsed => "json.parsed",
            Self::ParsingFailed => "parsing.failed",
            Self::ChunksPrepared => "chunks.prepared",
            Self::ChunkingFailed => "chunking.failed",
        }
    }

    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "ArchiveIngested" => Some(Self::ArchiveIngested),
            "JSONParsed" => Some(Self::JsonParsed),
            "ParsingFailed" => Some(Self::ParsingFailed),
            "ChunksPrepared" => Some(Self::ChunksPrepared),
            "ChunkingFailed" => Some(Self::ChunkingFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event はエンベロープの data 部に載る型付きペイロード。
pub trait Event: Serialize + DeserializeOwned + Send + Sync {
    const EVENT_TYPE: EventType;
}

/// EventEnvelope はバス上を流れる全イベント共通の外枠。
///
/// `{event_type, event_id, timestamp, version, data}` の JSON として送受信する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_type: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    pub data: serde_json::Value,
}

fn default_version() -> String {
    ENVELOPE_VERSION.to_string()
}

impl EventEnvelope {
    /// 型付きイベントからエンベロープを生成する。
    pub fn from_event<E: Event>(event: &E) -> Result<Self, MessagingError> {
        let data = serde_json::to_value(event)
            .map_err(|e| MessagingError::SerializationError(e.to_string()))?;
        Ok(Self {
            event_type: E::EVENT_TYPE.as_str().to_string(),
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            version: default_version(),
            data,
        })
    }

    /// data 部を型付きイベントとして取り出す。event_type が一致しない場合はエラー。
    pub fn decode<E: Event>(&self) -> Result<E, MessagingError> {
        if self.event_type != E::EVENT_TYPE.as_str() {
            return Err(MessagingError::EventTypeMismatch {
                expected: E::EVENT_TYPE.as_str().to_string(),
                actual: self.event_type.clone(),
            });
        }
        serde_json::from_value(self.data.clone())
            .map_err(|e| MessagingError::DeserializationError(e.to_string()))
    }

    pub fn kind(&self) -> Option<EventType> {
        EventType::from_str_value(&self.event_type)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::DeserializationError(e.to_string()))
    }
}

/// ArchiveIngested はアーカイブファイルの取り込み完了を通知する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveIngested {
    pub archive_id: String,
    pub source_name: String,
    pub file_path: String,
    pub file_size_bytes: u64,
    pub file_hash_sha256: String,
    pub ingestion_started_at: DateTime<Utc>,
    pub ingestion_completed_at: DateTime<Utc>,
}

impl Event for ArchiveIngested {
    const EVENT_TYPE: EventType = EventType::ArchiveIngested;
}

/// JsonParsed はメッセージのパース完了を通知する。
/// メッセージ1件につき1イベントを発行するため、通常 message_count は 1。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonParsed {
    pub archive_id: String,
    pub message_count: usize,
    pub parsed_message_ids: Vec<String>,
    pub thread_count: usize,
    pub thread_ids: Vec<String>,
    pub parsing_duration_seconds: f64,
}

impl Event for JsonParsed {
    const EVENT_TYPE: EventType = EventType::JsonParsed;
}

impl JsonParsed {
    /// 1メッセージ分の JSONParsed イベントを生成する。
    pub fn single(
        archive_id: impl Into<String>,
        message_doc_id: impl Into<String>,
        thread_id: impl Into<String>,
        parsing_duration_seconds: f64,
    ) -> Self {
        Self {
            archive_id: archive_id.into(),
            message_count: 1,
            parsed_message_ids: vec![message_doc_id.into()],
            thread_count: 1,
            thread_ids: vec![thread_id.into()],
            parsing_duration_seconds,
        }
    }
}

/// ParsingFailed はアーカイブのパース失敗を通知する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsingFailed {
    pub archive_id: String,
    pub file_path: String,
    pub error_message: String,
    pub error_type: String,
    pub messages_parsed_before_failure: usize,
}

impl Event for ParsingFailed {
    const EVENT_TYPE: EventType = EventType::ParsingFailed;
}

/// ChunksPrepared はチャンクの永続化完了を通知する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunksPrepared {
    pub message_doc_ids: Vec<String>,
    pub chunk_count: usize,
    pub chunk_ids: Vec<String>,
    pub chunks_ready: bool,
    pub chunking_strategy: String,
    pub avg_chunk_size_tokens: f64,
}

impl Event for ChunksPrepared {
    const EVENT_TYPE: EventType = EventType::ChunksPrepared;
}

/// ChunkingFailed はチャンク化の失敗（リトライ上限到達を含む）を通知する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingFailed {
    pub message_doc_ids: Vec<String>,
    pub error_message: String,
    pub error_type: String,
    pub retry_count: u32,
}

impl Event for ChunkingFailed {
    const EVENT_TYPE: EventType = EventType::ChunkingFailed;
}
