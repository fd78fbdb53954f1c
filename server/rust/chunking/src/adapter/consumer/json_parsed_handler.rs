use std::sync::Arc;

use async_trait::async_trait;
use copilot_messaging::{Delivery, EventEnvelope, EventHandler, HandlerError, JsonParsed};

use crate::usecase::ChunkMessagesUseCase;

/// JsonParsedHandler は chunking.json-parsed キューの配信を ChunkMessagesUseCase に渡す。
pub struct JsonParsedHandler {
    chunk_uc: Arc<ChunkMessagesUseCase>,
}

impl JsonParsedHandler {
    pub fn new(chunk_uc: Arc<ChunkMessagesUseCase>) -> Self {
        Self { chunk_uc }
    }
}

#[async_trait]
impl EventHandler for JsonParsedHandler {
    async fn handle(&self, envelope: &EventEnvelope, delivery: &Delivery) -> Result<(), HandlerError> {
        let event: JsonParsed = envelope.decode().map_err(HandlerError::permanent)?;
        if delivery.redelivered {
            tracing::info!(
                archive_id = %event.archive_id,
                message_doc_ids = ?event.parsed_message_ids,
                delivery_count = delivery.delivery_count,
                "reprocessing redelivered message"
            );
        }
        match self.chunk_uc.execute(&event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    archive_id = %event.archive_id,
                    error_type = e.error_type(),
                    error = %e,
                    delivery_count = delivery.delivery_count,
                    "chunking attempt failed"
                );
                Err(HandlerError::transient(e))
            }
        }
    }

    async fn on_exhausted(
        &self,
        envelope: &EventEnvelope,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let event: JsonParsed = envelope.decode().map_err(HandlerError::permanent)?;
        let message = format!(
            "giving up after {} delivery attempts: {}",
            delivery.delivery_count, error
        );
        self.chunk_uc
            .report_failure(&event, "RetriesExhausted", &message, delivery.delivery_count)
            .await
            .map_err(|e| {
                tracing::error!(
                    archive_id = %event.archive_id,
                    error = %e,
                    "failed to publish ChunkingFailed"
                );
                HandlerError::transient(e)
            })
    }
}
