use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::consumer::{Delivery, EventSubscriber};
use crate::error::MessagingError;
use crate::event::EventEnvelope;

/// HandlerError はイベントハンドラーの失敗種別を表す。
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// 再配信で回復し得る失敗（ストア・ブローカーの一時障害など）
    #[error("transient failure: {0}")]
    Transient(String),
    /// 再配信しても回復しない失敗（不正なペイロードなど）
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn permanent(err: impl std::fmt::Display) -> Self {
        Self::Permanent(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// EventHandler は1配信分のイベント処理を担う。
///
/// `handle` が `Ok` を返した時点で出力は永続化済みでなければならない。
/// 再配信されても同じ結果になるよう冪等に実装する。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope, delivery: &Delivery)
        -> Result<(), HandlerError>;

    /// 一時エラーのまま最大配信回数に達したときに呼ばれる。失敗イベントの発行などに使う。
    ///
    /// `Err` を返した場合、配信は破棄されず再キューされる。
    async fn on_exhausted(
        &self,
        _envelope: &EventEnvelope,
        _delivery: &Delivery,
        _error: &HandlerError,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// ProcessOutcome は1配信の処理結果を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 処理成功・ack 済み
    Acked,
    /// 一時エラー・再キュー済み
    Requeued,
    /// 恒久エラーまたはリトライ上限到達・破棄済み
    Rejected,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Requeued => "requeued",
            Self::Rejected => "rejected",
        }
    }
}

/// OutcomeRecorder は処理結果の観測点（メトリクス記録など）。
pub trait OutcomeRecorder: Send + Sync {
    fn record(&self, routing_key: &str, outcome: ProcessOutcome);
}

/// EventProcessor は receive → handle → ack / nack のサイクルを実行する。
pub struct EventProcessor {
    subscriber: Arc<dyn EventSubscriber>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    recorder: Option<Arc<dyn OutcomeRecorder>>,
}

impl EventProcessor {
    pub fn new(
        subscriber: Arc<dyn EventSubscriber>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            subscriber,
            handler,
            config,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OutcomeRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 1配信を受信して処理する。
    pub async fn process_one(&self) -> Result<ProcessOutcome, MessagingError> {
        let delivery = self.subscriber.receive().await?;
        let outcome = self.process_delivery(&delivery).await?;
        if let Some(ref recorder) = self.recorder {
            recorder.record(&delivery.routing_key, outcome);
        }
        Ok(outcome)
    }

    async fn process_delivery(&self, delivery: &Delivery) -> Result<ProcessOutcome, MessagingError> {
        let envelope = match delivery.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    routing_key = %delivery.routing_key,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "undecodable message rejected"
                );
                self.subscriber.nack(delivery, false).await?;
                return Ok(ProcessOutcome::Rejected);
            }
        };

        match self.handler.handle(&envelope, delivery).await {
            Ok(()) => {
                // ack に失敗しても再配信時に冪等処理されるため、ログのみとする
                if let Err(e) = self.subscriber.ack(delivery).await {
                    tracing::warn!(
                        event_id = %envelope.event_id,
                        error = %e,
                        "ack failed, message will be redelivered"
                    );
                }
                tracing::debug!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    delivery_count = delivery.delivery_count,
                    "event processed"
                );
                Ok(ProcessOutcome::Acked)
            }
            Err(err @ HandlerError::Permanent(_)) => {
                tracing::error!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %err,
                    "event rejected"
                );
                self.subscriber.nack(delivery, false).await?;
                Ok(ProcessOutcome::Rejected)
            }
            Err(err) if delivery.delivery_count >= self.config.max_delivery_attempts => {
                tracing::error!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    delivery_count = delivery.delivery_count,
                    error = %err,
                    "delivery attempts exhausted, dead-lettering"
                );
                if let Err(e) = self.handler.on_exhausted(&envelope, delivery, &err).await {
                    // 失敗イベントを残せないまま破棄しない
                    let backoff = self.config.backoff_for(delivery.delivery_count);
                    tracing::error!(
                        event_id = %envelope.event_id,
                        event_type = %envelope.event_type,
                        delivery_count = delivery.delivery_count,
                        error = %e,
                        "failure event not recorded, requeueing exhausted delivery"
                    );
                    tokio::time::sleep(backoff).await;
                    self.subscriber.nack(delivery, true).await?;
                    return Ok(ProcessOutcome::Requeued);
                }
                self.subscriber.nack(delivery, false).await?;
                Ok(ProcessOutcome::Rejected)
            }
            Err(err) => {
                let backoff = self.config.backoff_for(delivery.delivery_count);
                tracing::warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    delivery_count = delivery.delivery_count,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient failure, requeueing"
                );
                tokio::time::sleep(backoff).await;
                self.subscriber.nack(delivery, true).await?;
                Ok(ProcessOutcome::Requeued)
            }
        }
    }

    /// キャンセルされるまで処理を続ける。
    ///
    /// キャンセルは配信と配信の間でのみ反映され、処理中の配信は ack / nack まで完了する。
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), MessagingError> {
        tracing::info!(queue = %self.config.queue, "event processor started");
        loop {
            let delivery = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.subscriber.receive() => received,
            };
            match delivery {
                Ok(delivery) => match self.process_delivery(&delivery).await {
                    Ok(outcome) => {
                        if let Some(ref recorder) = self.recorder {
                            recorder.record(&delivery.routing_key, outcome);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            queue = %self.config.queue,
                            delivery_tag = delivery.delivery_tag,
                            error = %e,
                            "failed to settle delivery"
                        );
                    }
                },
                Err(e) => {
                    tracing::error!(queue = %self.config.queue, error = %e, "receive failed");
                    tokio::time::sleep(self.config.backoff_for(1)).await;
                }
            }
        }
        tracing::info!(queue = %self.config.queue, "event processor stopped");
        Ok(())
    }
}
