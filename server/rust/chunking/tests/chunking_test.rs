use std::sync::Arc;

use copilot_chunking::adapter::consumer::JsonParsedHandler;
use copilot_chunking::domain::entity::chunk::chunk_id;
use copilot_chunking::domain::service::{ChunkerConfig, WordWindowChunker};
use copilot_chunking::infrastructure::persistence::{
    ChunkDocumentRepository, MessageDocumentRepository,
};
use copilot_chunking::usecase::ChunkMessagesUseCase;
use copilot_document_store::{DocumentStore, Filter, InMemoryDocumentStore};
use copilot_messaging::{
    publish_event, ChunkingFailed, ChunksPrepared, ConsumerConfig, EventProcessor,
    EventSubscriber, InMemoryBroker, JsonParsed, ProcessOutcome,
};
use serde_json::json;

const QUEUE: &str = "chunking.json-parsed";
const DOWNSTREAM: &str = "embedding.chunks-prepared";
const FAILURES: &str = "failures";

struct Harness {
    store: Arc<InMemoryDocumentStore>,
    broker: Arc<InMemoryBroker>,
    processor: EventProcessor,
}

fn use_case(store: &Arc<InMemoryDocumentStore>, broker: &Arc<InMemoryBroker>) -> ChunkMessagesUseCase {
    ChunkMessagesUseCase::new(
        Arc::new(MessageDocumentRepository::new(store.clone())),
        Arc::new(ChunkDocumentRepository::new(store.clone())),
        broker.clone(),
        WordWindowChunker::new(ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            min_chunk_size: 3,
        })
        .unwrap(),
    )
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryDocumentStore::new());
    let broker = Arc::new(InMemoryBroker::new("copilot.events"));
    let mut consumer = ConsumerConfig::new(QUEUE, vec!["json.parsed".to_string()]);
    consumer.max_delivery_attempts = 2;
    consumer.retry_backoff_ms = 1;
    consumer.max_backoff_ms = 1;
    broker.declare_queue(QUEUE, &consumer.bindings).unwrap();
    broker
        .declare_queue(DOWNSTREAM, &["chunks.prepared".to_string()])
        .unwrap();
    broker
        .declare_queue(FAILURES, &["*.failed".to_string()])
        .unwrap();

    let subscriber = Arc::new(broker.subscribe(QUEUE).unwrap());
    let processor = EventProcessor::new(
        subscriber,
        Arc::new(JsonParsedHandler::new(Arc::new(use_case(&store, &broker)))),
        consumer,
    );
    Harness {
        store,
        broker,
        processor,
    }
}

async fn store_message(h: &Harness, message_doc_id: &str, words: usize) {
    let body = (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    h.store
        .insert(
            "messages",
            message_doc_id,
            json!({
                "message_doc_id": message_doc_id,
                "archive_id": "arc1",
                "message_id": format!("{message_doc_id}@example.com"),
                "thread_id": "thread-1",
                "body_normalized": body,
            }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_message_is_chunked_and_announced() {
    let h = harness();
    // (0,10) (8,18) (16,25)
    store_message(&h, "m1", 25).await;
    publish_event(h.broker.as_ref(), &JsonParsed::single("arc1", "m1", "thread-1", 0.1))
        .await
        .unwrap();

    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Acked);

    let mut filter = Filter::new();
    filter.insert("message_doc_id".to_string(), json!("m1"));
    let chunks = h.store.find("chunks", &filter, None).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c["embedding_generated"] == false));

    let downstream = h.broker.subscribe(DOWNSTREAM).unwrap();
    let delivery = downstream.receive().await.unwrap();
    let prepared: ChunksPrepared = delivery.envelope().unwrap().decode().unwrap();
    assert_eq!(prepared.message_doc_ids, vec!["m1".to_string()]);
    assert_eq!(prepared.chunk_count, 3);
    assert_eq!(
        prepared.chunk_ids,
        vec![chunk_id("m1", 0), chunk_id("m1", 1), chunk_id("m1", 2)]
    );
    assert!(prepared.chunks_ready);
    assert_eq!(prepared.chunking_strategy, "token_window");
    assert_eq!(h.broker.queue_depth(QUEUE).unwrap().total(), 0);
}

#[tokio::test]
async fn test_redelivery_creates_no_extra_chunks() {
    let h = harness();
    store_message(&h, "m1", 25).await;
    publish_event(h.broker.as_ref(), &JsonParsed::single("arc1", "m1", "thread-1", 0.1))
        .await
        .unwrap();

    // チャンク保存後、ack 前にクラッシュしたケースを再現する
    {
        let subscriber = h.broker.subscribe(QUEUE).unwrap();
        let delivery = subscriber.receive().await.unwrap();
        let event: JsonParsed = delivery.envelope().unwrap().decode().unwrap();
        use_case(&h.store, &h.broker).execute(&event).await.unwrap();
    }
    h.broker.restart();

    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Acked);
    assert_eq!(h.store.len("chunks").await, 3);

    // 再配信でも ChunksPrepared は発行される
    let downstream = h.broker.subscribe(DOWNSTREAM).unwrap();
    for _ in 0..2 {
        let delivery = downstream.receive().await.unwrap();
        let prepared: ChunksPrepared = delivery.envelope().unwrap().decode().unwrap();
        assert_eq!(prepared.chunk_count, 3);
        downstream.ack(&delivery).await.unwrap();
    }
    assert_eq!(h.broker.queue_depth(QUEUE).unwrap().total(), 0);
}

#[tokio::test]
async fn test_missing_message_is_retried_then_dead_lettered() {
    let h = harness();
    publish_event(
        h.broker.as_ref(),
        &JsonParsed::single("arc1", "never-written", "thread-1", 0.1),
    )
    .await
    .unwrap();

    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Rejected);
    assert_eq!(h.broker.queue_depth(QUEUE).unwrap().total(), 0);
    assert_eq!(h.broker.queue_depth(DOWNSTREAM).unwrap().total(), 0);

    let failures = h.broker.subscribe(FAILURES).unwrap();
    let delivery = failures.receive().await.unwrap();
    assert_eq!(delivery.routing_key, "chunking.failed");
    let failed: ChunkingFailed = delivery.envelope().unwrap().decode().unwrap();
    assert_eq!(failed.message_doc_ids, vec!["never-written".to_string()]);
    assert_eq!(failed.retry_count, 2);
    assert!(failed.error_message.contains("never-written"));
}

#[tokio::test]
async fn test_message_written_late_is_picked_up_on_retry() {
    let h = harness();
    publish_event(h.broker.as_ref(), &JsonParsed::single("arc1", "m1", "thread-1", 0.1))
        .await
        .unwrap();

    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    store_message(&h, "m1", 5).await;
    assert_eq!(h.processor.process_one().await.unwrap(), ProcessOutcome::Acked);
    assert_eq!(h.store.len("chunks").await, 1);
}
