use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use copilot_messaging::{
    publish_event, ChunkingFailed, ConsumerConfig, Delivery, EventEnvelope, EventHandler,
    EventProcessor, EventPublisher, EventSubscriber, HandlerError, InMemoryBroker, JsonParsed,
    MessagingError, ProcessOutcome,
};
use tokio::sync::Mutex;

/// 書き込み済み ID を覚えておき、重複書き込みを成功扱いにするハンドラー。
struct RecordingHandler {
    written: Mutex<HashSet<String>>,
    handled: AtomicU32,
    failures_before_success: AtomicU32,
}

impl RecordingHandler {
    fn new(failures_before_success: u32) -> Self {
        Self {
            written: Mutex::new(HashSet::new()),
            handled: AtomicU32::new(0),
            failures_before_success: AtomicU32::new(failures_before_success),
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: &EventEnvelope, _delivery: &Delivery) -> Result<(), HandlerError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_before_success
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HandlerError::transient("document store unavailable"));
        }
        let event: JsonParsed = envelope.decode().map_err(HandlerError::permanent)?;
        let mut written = self.written.lock().await;
        for id in event.parsed_message_ids {
            written.insert(id);
        }
        Ok(())
    }
}

fn consumer_config() -> ConsumerConfig {
    let mut cfg = ConsumerConfig::new("chunking.json-parsed", vec!["json.parsed".to_string()]);
    cfg.max_delivery_attempts = 3;
    cfg.retry_backoff_ms = 1;
    cfg.max_backoff_ms = 1;
    cfg
}

fn setup() -> Arc<InMemoryBroker> {
    let broker = Arc::new(InMemoryBroker::new("copilot.events"));
    let cfg = consumer_config();
    broker.declare_queue(&cfg.queue, &cfg.bindings).unwrap();
    broker
}

#[tokio::test]
async fn test_messages_published_while_consumer_down_are_retained() {
    let broker = setup();
    for i in 0..3 {
        publish_event(
            broker.as_ref(),
            &JsonParsed::single("arc-1", format!("msg-{i}"), "thread-1", 0.1),
        )
        .await
        .unwrap();
    }
    broker.restart();

    let handler = Arc::new(RecordingHandler::new(0));
    let subscriber = Arc::new(broker.subscribe("chunking.json-parsed").unwrap());
    let processor = EventProcessor::new(subscriber, handler.clone(), consumer_config());
    for _ in 0..3 {
        assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Acked);
    }

    assert_eq!(handler.written.lock().await.len(), 3);
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().total(), 0);
}

#[tokio::test]
async fn test_crash_before_ack_redelivers_and_writes_once() {
    let broker = setup();
    publish_event(
        broker.as_ref(),
        &JsonParsed::single("arc-1", "msg-1", "thread-1", 0.1),
    )
    .await
    .unwrap();

    let handler = Arc::new(RecordingHandler::new(0));

    // 処理は成功したが ack 前にコンシューマーが落ちたケース
    {
        let subscriber = broker.subscribe("chunking.json-parsed").unwrap();
        let delivery = subscriber.receive().await.unwrap();
        let envelope = delivery.envelope().unwrap();
        handler.handle(&envelope, &delivery).await.unwrap();
    }
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().ready, 1);

    let subscriber = Arc::new(broker.subscribe("chunking.json-parsed").unwrap());
    let processor = EventProcessor::new(subscriber, handler.clone(), consumer_config());
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Acked);

    assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
    assert_eq!(handler.written.lock().await.len(), 1);
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().total(), 0);
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let broker = setup();
    publish_event(
        broker.as_ref(),
        &JsonParsed::single("arc-1", "msg-1", "thread-1", 0.1),
    )
    .await
    .unwrap();

    let handler = Arc::new(RecordingHandler::new(2));
    let subscriber = Arc::new(broker.subscribe("chunking.json-parsed").unwrap());
    let processor = EventProcessor::new(subscriber, handler.clone(), consumer_config());

    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Acked);
    assert_eq!(handler.written.lock().await.len(), 1);
}

/// 常に一時エラーを返し、上限到達時に失敗イベントを発行するハンドラー。
struct AlwaysFailingHandler {
    publisher: Arc<dyn EventPublisher>,
}

#[async_trait]
impl EventHandler for AlwaysFailingHandler {
    async fn handle(&self, _envelope: &EventEnvelope, _delivery: &Delivery) -> Result<(), HandlerError> {
        Err(HandlerError::transient("timeout"))
    }

    async fn on_exhausted(
        &self,
        envelope: &EventEnvelope,
        delivery: &Delivery,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let ids = envelope
            .decode::<JsonParsed>()
            .map(|e| e.parsed_message_ids)
            .unwrap_or_default();
        let failed = ChunkingFailed {
            message_doc_ids: ids,
            error_message: error.to_string(),
            error_type: "Exhausted".to_string(),
            retry_count: delivery.delivery_count,
        };
        publish_event(self.publisher.as_ref(), &failed)
            .await
            .map(|_| ())
            .map_err(HandlerError::transient)
    }
}

/// 停止中は発行に失敗し、復旧後はブローカーへ転送するパブリッシャー。
struct FlakyPublisher {
    broker: Arc<InMemoryBroker>,
    down: AtomicBool,
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish(&self, routing_key: &str, envelope: &EventEnvelope) -> Result<(), MessagingError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(MessagingError::PublishError("broker unreachable".to_string()));
        }
        self.broker.publish(routing_key, envelope).await
    }
}

#[tokio::test]
async fn test_exhausted_delivery_is_dead_lettered_with_failure_event() {
    let broker = setup();
    broker
        .declare_queue("failures", &["*.failed".to_string()])
        .unwrap();
    publish_event(
        broker.as_ref(),
        &JsonParsed::single("arc-1", "msg-1", "thread-1", 0.1),
    )
    .await
    .unwrap();

    let handler = Arc::new(AlwaysFailingHandler {
        publisher: broker.clone(),
    });
    let subscriber = Arc::new(broker.subscribe("chunking.json-parsed").unwrap());
    let processor = EventProcessor::new(subscriber, handler, consumer_config());

    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Rejected);
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().total(), 0);

    let failures = broker.subscribe("failures").unwrap();
    let delivery = failures.receive().await.unwrap();
    assert_eq!(delivery.routing_key, "chunking.failed");
    let failed: ChunkingFailed = delivery.envelope().unwrap().decode().unwrap();
    assert_eq!(failed.message_doc_ids, vec!["msg-1".to_string()]);
    assert_eq!(failed.retry_count, 3);
}

#[tokio::test]
async fn test_exhausted_delivery_is_kept_until_failure_event_is_published() {
    let broker = setup();
    broker
        .declare_queue("failures", &["*.failed".to_string()])
        .unwrap();
    publish_event(
        broker.as_ref(),
        &JsonParsed::single("arc-1", "msg-1", "thread-1", 0.1),
    )
    .await
    .unwrap();

    let publisher = Arc::new(FlakyPublisher {
        broker: broker.clone(),
        down: AtomicBool::new(true),
    });
    let handler = Arc::new(AlwaysFailingHandler {
        publisher: publisher.clone(),
    });
    let mut cfg = consumer_config();
    cfg.max_delivery_attempts = 1;
    let subscriber = Arc::new(broker.subscribe("chunking.json-parsed").unwrap());
    let processor = EventProcessor::new(subscriber, handler, cfg);

    // 失敗イベントを発行できない間は破棄しない
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Requeued);
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().ready, 1);
    assert_eq!(broker.queue_depth("failures").unwrap().total(), 0);

    publisher.down.store(false, Ordering::SeqCst);
    assert_eq!(processor.process_one().await.unwrap(), ProcessOutcome::Rejected);
    assert_eq!(broker.queue_depth("chunking.json-parsed").unwrap().total(), 0);

    let failures = broker.subscribe("failures").unwrap();
    let delivery = failures.receive().await.unwrap();
    let failed: ChunkingFailed = delivery.envelope().unwrap().decode().unwrap();
    assert_eq!(failed.message_doc_ids, vec!["msg-1".to_string()]);
    assert_eq!(failed.retry_count, 2);
}
