use std::net::SocketAddr;
use std::sync::Arc;

use copilot_ingestion::adapter::handler::{self, AppState};
use copilot_ingestion::infrastructure::config::Config;
use copilot_ingestion::infrastructure::persistence::ArchiveDocumentRepository;
use copilot_ingestion::usecase::IngestArchiveUseCase;
use copilot_messaging::{EventPublisher, MessagingBackend};
use copilot_telemetry::{MeteredPublisher, Metrics};
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
        "starting ingestion server"
    );

    let metrics = Arc::new(Metrics::new(&cfg.app.name)?);

    // Document store
    let store = copilot_document_store::open_store(cfg.database.as_ref()).await?;
    let archive_repo =
        Arc::new(ArchiveDocumentRepository::new(store).with_metrics(metrics.clone()));

    // Messaging
    let clients = copilot_messaging::connect(&cfg.messaging, None)?;
    if cfg.messaging.backend == MessagingBackend::Memory {
        tracing::warn!("in-memory message broker is process-local, events will not reach other services");
    }
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(MeteredPublisher::new(clients.publisher, metrics.clone()));

    // Ingest configured sources
    let ingest_uc = IngestArchiveUseCase::new(archive_repo, publisher);
    let results = ingest_uc.ingest_sources(&cfg.ingestion.sources).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(
        total = results.len(),
        failed,
        "ingestion of configured sources completed"
    );

    if cfg.ingestion.keep_running {
        let state = AppState {
            metrics: metrics.clone(),
        };
        let app = handler::router(state).layer(copilot_telemetry::MetricsLayer::new(metrics));
        let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
        info!("REST server starting on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    copilot_telemetry::shutdown();
    if failed > 0 {
        anyhow::bail!("{failed} archive(s) failed to ingest");
    }
    Ok(())
}
