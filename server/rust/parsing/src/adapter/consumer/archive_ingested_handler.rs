use std::sync::Arc;

use async_trait::async_trait;
use copilot_messaging::{ArchiveIngested, Delivery, EventEnvelope, EventHandler, HandlerError};

use crate::usecase::ParseArchiveUseCase;

/// ArchiveIngestedHandler は parsing.archive-ingested キューの配信を ParseArchiveUseCase に渡す。
pub struct ArchiveIngestedHandler {
    parse_uc: Arc<ParseArchiveUseCase>,
}

impl ArchiveIngestedHandler {
    pub fn new(parse_uc: Arc<ParseArchiveUseCase>) -> Self {
        Self { parse_uc }
    }
}

#[async_trait]
impl EventHandler for ArchiveIngestedHandler {
    async fn handle(&self, envelope: &EventEnvelope, delivery: &Delivery) -> Result<(), HandlerError> {
        let event: ArchiveIngested = envelope.decode().map_err(HandlerError::permanent)?;
        if delivery.redelivered {
            tracing::info!(
                archive_id = %event.archive_id,
                delivery_count = delivery.delivery_count,
                "reprocessing redelivered archive"
            );
        }
        self.parse_uc
            .execute(&event)
            .await
            .map(|_| ())
            .map_err(HandlerError::transient)
    }

    async fn on_exhausted(
        &self,
        envelope: &EventEnvelope,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let event: ArchiveIngested = envelope.decode().map_err(HandlerError::permanent)?;
        let message = format!(
            "giving up after {} delivery attempts: {}",
            delivery.delivery_count, error
        );
        self.parse_uc
            .fail(&event, "RetriesExhausted", &message)
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::error!(
                    archive_id = %event.archive_id,
                    error = %e,
                    "failed to publish ParsingFailed"
                );
                HandlerError::transient(e)
            })
    }
}
