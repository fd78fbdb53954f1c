use std::net::SocketAddr;
use std::sync::Arc;

use copilot_messaging::{EventPublisher, EventProcessor};
use copilot_chunking::adapter::consumer::JsonParsedHandler;
use copilot_chunking::adapter::handler::{self, AppState};
use copilot_chunking::domain::service::WordWindowChunker;
use copilot_chunking::infrastructure::config::Config;
use copilot_chunking::infrastructure::persistence::{
    ChunkDocumentRepository, MessageDocumentRepository,
};
use copilot_chunking::usecase::ChunkMessagesUseCase;
use copilot_telemetry::{MeteredPublisher, Metrics};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config
    let cfg = Config::load()?;

    // Telemetry
    copilot_telemetry::init_telemetry(&cfg.telemetry())?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        queue = %cfg.consumer.queue,
        chunk_size = cfg.chunking.chunk_size,
        chunk_overlap = cfg.chunking.chunk_overlap,
        "starting chunking server"
    );

    let metrics = Arc::new(Metrics::new(&cfg.app.name)?);

    // Document store
    let store = copilot_document_store::open_store(cfg.database.as_ref()).await?;
    let message_repo = Arc::new(MessageDocumentRepository::new(store.clone()));
    let chunk_repo = Arc::new(ChunkDocumentRepository::new(store).with_metrics(metrics.clone()));

    // Messaging
    let clients = copilot_messaging::connect(&cfg.messaging, Some(&cfg.consumer))?;
    let subscriber = clients
        .subscriber
        .ok_or_else(|| anyhow::anyhow!("no subscriber created for queue {}", cfg.consumer.queue))?;
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(MeteredPublisher::new(clients.publisher, metrics.clone()));

    // Processor
    let chunker = WordWindowChunker::new(cfg.chunking.clone())?;
    let chunk_uc = Arc::new(ChunkMessagesUseCase::new(
        message_repo,
        chunk_repo,
        publisher,
        chunker,
    ));
    let event_handler = Arc::new(JsonParsedHandler::new(chunk_uc));
    let processor = EventProcessor::new(subscriber, event_handler, cfg.consumer.clone())
        .with_recorder(metrics.clone());

    let cancel = CancellationToken::new();
    let processor_cancel = cancel.clone();
    let processor_task = tokio::spawn(async move { processor.run(processor_cancel).await });

    // REST server
    let state = AppState {
        metrics: metrics.clone(),
    };
    let app = handler::router(state).layer(copilot_telemetry::MetricsLayer::new(metrics));
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!("REST server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    processor_task.await??;
    copilot_telemetry::shutdown();
    Ok(())
}
