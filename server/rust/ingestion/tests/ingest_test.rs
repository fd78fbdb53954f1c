use std::sync::Arc;

use copilot_document_store::{DocumentStore, InMemoryDocumentStore};
use copilot_ingestion::infrastructure::config::SourceConfig;
use copilot_ingestion::infrastructure::persistence::ArchiveDocumentRepository;
use copilot_ingestion::usecase::{IngestArchiveUseCase, IngestOutcome};
use copilot_messaging::{ArchiveIngested, EventSubscriber, InMemoryBroker};
use serde_json::json;

const QUEUE: &str = "parsing.archive-ingested";

fn setup() -> (Arc<InMemoryDocumentStore>, Arc<InMemoryBroker>, IngestArchiveUseCase) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let broker = Arc::new(InMemoryBroker::new("copilot.events"));
    broker
        .declare_queue(QUEUE, &["archive.ingested".to_string()])
        .unwrap();
    let repo = Arc::new(ArchiveDocumentRepository::new(store.clone()));
    let uc = IngestArchiveUseCase::new(repo, broker.clone());
    (store, broker, uc)
}

#[tokio::test]
async fn test_ingest_publishes_archive_ingested() {
    let (store, broker, uc) = setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2024-01.mbox");
    std::fs::write(&path, "From a@example.com Mon Jan 1 00:00:00 2024\nSubject: hi\n\nhello\n").unwrap();

    let outcome = uc.execute(&path, "ietf-quic").await.unwrap();
    let archive_id = outcome.archive_id().to_string();

    let doc = store.get("archives", &archive_id).await.unwrap().unwrap();
    assert_eq!(doc["status"], "pending");
    assert_eq!(doc["source"], "ietf-quic");

    let subscriber = broker.subscribe(QUEUE).unwrap();
    let delivery = subscriber.receive().await.unwrap();
    let event: ArchiveIngested = delivery.envelope().unwrap().decode().unwrap();
    assert_eq!(event.archive_id, archive_id);
    assert_eq!(event.source_name, "ietf-quic");
    assert_eq!(event.file_path, path.display().to_string());
    subscriber.ack(&delivery).await.unwrap();
}

#[tokio::test]
async fn test_reingest_skips_processed_and_republishes_pending() {
    let (store, broker, uc) = setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.mbox");
    std::fs::write(&path, "From x\n\nbody\n").unwrap();

    let first = uc.execute(&path, "s").await.unwrap();
    let second = uc.execute(&path, "s").await.unwrap();
    assert!(matches!(second, IngestOutcome::Republished { .. }));
    assert_eq!(broker.queue_depth(QUEUE).unwrap().ready, 2);

    store
        .update("archives", first.archive_id(), json!({"status": "processed"}))
        .await
        .unwrap();
    let third = uc.execute(&path, "s").await.unwrap();
    assert!(matches!(third, IngestOutcome::AlreadyIngested { .. }));
    assert_eq!(broker.queue_depth(QUEUE).unwrap().ready, 2);
    assert_eq!(store.len("archives").await, 1);
}

#[tokio::test]
async fn test_ingest_sources_continues_after_failure() {
    let (store, _broker, uc) = setup();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.mbox"), "From x\n\none\n").unwrap();
    std::fs::write(dir.path().join("b.mbox"), "From y\n\ntwo\n").unwrap();

    let sources = vec![
        SourceConfig {
            name: "missing".to_string(),
            path: dir.path().join("does-not-exist"),
        },
        SourceConfig {
            name: "list".to_string(),
            path: dir.path().to_path_buf(),
        },
    ];
    let results = uc.ingest_sources(&sources).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_err());
    assert!(results[1..].iter().all(Result::is_ok));
    assert_eq!(store.len("archives").await, 2);
}
