use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MessagingError;
use crate::routing::validate_binding;

/// パイプライン全体で共有するトピックエクスチェンジ名。
pub const DEFAULT_EXCHANGE: &str = "copilot.events";

/// MessagingBackend はメッセージバスの実装種別を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingBackend {
    /// プロセス内の永続キューブローカー（開発・テスト用）
    #[default]
    Memory,
    /// Kafka（feature = "kafka" が必要）
    Kafka,
}

/// MessagingConfig はメッセージバス接続設定を表す。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub backend: MessagingBackend,
    /// Kafka ブローカーアドレスのリスト（例: ["kafka:9092"]）
    #[serde(default)]
    pub brokers: Vec<String>,
    /// 発行先エクスチェンジ名
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// セキュリティプロトコル（PLAINTEXT / SSL / SASL_PLAINTEXT / SASL_SSL）
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    /// 発行タイムアウト（ミリ秒）
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_exchange() -> String {
    DEFAULT_EXCHANGE.to_string()
}

fn default_security_protocol() -> String {
    "PLAINTEXT".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::Memory,
            brokers: Vec::new(),
            exchange: default_exchange(),
            security_protocol: default_security_protocol(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl MessagingConfig {
    /// ブローカーアドレスをカンマ区切り文字列で返す（rdkafka 用）。
    pub fn brokers_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 設定値の整合性を検証する。
    pub fn validate(&self) -> Result<(), MessagingError> {
        if self.exchange.trim().is_empty() {
            return Err(MessagingError::ConfigurationError(
                "exchange must not be empty".to_string(),
            ));
        }
        if self.backend == MessagingBackend::Kafka && self.brokers.is_empty() {
            return Err(MessagingError::ConfigurationError(
                "at least one broker must be specified for the kafka backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// ConsumerConfig は永続キューの購読設定を表す。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// 永続キュー名（Kafka ではコンシューマーグループ ID の既定値）
    pub queue: String,
    /// キューに結びつけるルーティングキーパターン
    pub bindings: Vec<String>,
    /// Kafka コンシューマーグループ ID（未指定時は queue を使う）
    #[serde(default)]
    pub group_id: Option<String>,
    /// 一時エラー時の最大配信回数。到達したメッセージは再キューせずに破棄する。
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    /// 再キュー前の待機時間の基準値（ミリ秒）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 再キュー前の待機時間の上限（ミリ秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>, bindings: Vec<String>) -> Self {
        Self {
            queue: queue.into(),
            bindings,
            group_id: None,
            max_delivery_attempts: default_max_delivery_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn group_id(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.queue)
    }

    /// 配信回数 attempt 回目の失敗後に待機する時間を返す（指数バックオフ）。
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn validate(&self) -> Result<(), MessagingError> {
        if self.queue.trim().is_empty() {
            return Err(MessagingError::ConfigurationError(
                "queue name must not be empty".to_string(),
            ));
        }
        if self.bindings.is_empty() {
            return Err(MessagingError::ConfigurationError(format!(
                "queue {} has no bindings",
                self.queue
            )));
        }
        if self.max_delivery_attempts == 0 {
            return Err(MessagingError::ConfigurationError(
                "max_delivery_attempts must be at least 1".to_string(),
            ));
        }
        for binding in &self.bindings {
            validate_binding(binding)?;
        }
        Ok(())
    }
}
