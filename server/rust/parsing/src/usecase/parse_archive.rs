use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use copilot_messaging::{
    publish_event, ArchiveIngested, EventPublisher, JsonParsed, MessagingError, ParsingFailed,
};

use crate::domain::repository::{ArchiveStatusRepository, MessageRepository};
use crate::domain::service::MboxParser;

/// ParseOutcome はアーカイブ 1 件の解析結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// メッセージを保存し、メッセージごとに JSONParsed を発行した
    Parsed {
        message_count: usize,
        thread_count: usize,
    },
    /// ParsingFailed を発行した（再配信しても結果は変わらない）
    Failed { error_type: String },
}

/// ParseError は再配信で回復し得る失敗を表す。
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to store message: {0}")]
    Store(anyhow::Error),
    #[error("failed to publish event: {0}")]
    Publish(#[from] MessagingError),
}

/// ParseArchiveUseCase は ArchiveIngested を受けて mbox を解析し、メッセージを保存する。
pub struct ParseArchiveUseCase {
    messages: Arc<dyn MessageRepository>,
    archives: Arc<dyn ArchiveStatusRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl ParseArchiveUseCase {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        archives: Arc<dyn ArchiveStatusRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            messages,
            archives,
            publisher,
        }
    }

    /// アーカイブを解析する。
    ///
    /// 再実行しても同じメッセージ ID になるため、再配信時の保存は重複として成功扱いになる。
    /// JSONParsed は毎回発行し、下流で冪等に処理される。
    pub async fn execute(&self, event: &ArchiveIngested) -> Result<ParseOutcome, ParseError> {
        let started = Instant::now();

        let content = match tokio::fs::read(&event.file_path).await {
            Ok(content) => content,
            Err(e) => {
                let error_type = if e.kind() == std::io::ErrorKind::NotFound {
                    "FileNotFound"
                } else {
                    "IoError"
                };
                let message = format!("failed to read {}: {}", event.file_path, e);
                return self.fail(event, error_type, &message).await;
            }
        };

        let text = String::from_utf8_lossy(&content);
        let documents = MboxParser::parse(&text, &event.archive_id, Utc::now());
        if documents.is_empty() {
            return self
                .fail(event, "NoMessagesParsed", "no messages could be parsed from archive")
                .await;
        }

        let mut threads = std::collections::HashSet::new();
        for document in &documents {
            self.messages
                .save(document)
                .await
                .map_err(ParseError::Store)?;
            let parsed = JsonParsed::single(
                &event.archive_id,
                &document.message_doc_id,
                &document.thread_id,
                started.elapsed().as_secs_f64(),
            );
            publish_event(self.publisher.as_ref(), &parsed).await?;
            threads.insert(document.thread_id.as_str());
        }

        // ステータス更新の失敗は ack を妨げない
        if let Err(e) = self
            .archives
            .mark_processed(&event.archive_id, documents.len())
            .await
        {
            tracing::warn!(
                archive_id = %event.archive_id,
                error = %e,
                "failed to mark archive as processed"
            );
        }

        tracing::info!(
            archive_id = %event.archive_id,
            message_count = documents.len(),
            thread_count = threads.len(),
            duration_secs = started.elapsed().as_secs_f64(),
            "archive parsed"
        );
        Ok(ParseOutcome::Parsed {
            message_count: documents.len(),
            thread_count: threads.len(),
        })
    }

    /// ParsingFailed を発行し、アーカイブを failed にする（後者はベストエフォート）。
    pub async fn fail(
        &self,
        event: &ArchiveIngested,
        error_type: &str,
        error_message: &str,
    ) -> Result<ParseOutcome, ParseError> {
        tracing::error!(
            archive_id = %event.archive_id,
            error_type,
            error = error_message,
            "archive parsing failed"
        );
        // 保存済み件数の取得失敗は失敗イベントの発行を妨げない
        let parsed_before = match self.messages.count_by_archive(&event.archive_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    archive_id = %event.archive_id,
                    error = %e,
                    "failed to count messages parsed before failure"
                );
                0
            }
        };
        let failed = ParsingFailed {
            archive_id: event.archive_id.clone(),
            file_path: event.file_path.clone(),
            error_message: error_message.to_string(),
            error_type: error_type.to_string(),
            messages_parsed_before_failure: parsed_before,
        };
        publish_event(self.publisher.as_ref(), &failed).await?;

        if let Err(e) = self
            .archives
            .mark_failed(&event.archive_id, error_message)
            .await
        {
            tracing::warn!(
                archive_id = %event.archive_id,
                error = %e,
                "failed to mark archive as failed"
            );
        }
        Ok(ParseOutcome::Failed {
            error_type: error_type.to_string(),
        })
    }
}
