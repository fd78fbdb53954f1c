//! InMemoryBroker: プロセス内で動作する永続キュー付きトピックエクスチェンジ。
//!
//! 開発モードとテストで使う。永続メッセージは `restart()` をまたいで保持され、
//! 未確認の配信はサブスクライバーの破棄やブローカー再起動でキューへ戻る。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::consumer::{Delivery, EventSubscriber};
use crate::error::MessagingError;
use crate::event::EventEnvelope;
use crate::publisher::{DeliveryMode, EventPublisher};
use crate::routing::{binding_matches, validate_binding, validate_routing_key};

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    payload: Vec<u8>,
    mode: DeliveryMode,
    redelivered: bool,
    delivery_count: u32,
}

#[derive(Debug)]
struct Unacked {
    consumer_id: u64,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    bindings: Vec<String>,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
}

impl QueueState {
    fn is_bound_to(&self, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|pattern| binding_matches(pattern, routing_key))
    }

    /// 未確認の配信をキュー先頭へ戻す。配信タグ順を保つ。
    fn requeue_where(&mut self, mut predicate: impl FnMut(&Unacked) -> bool) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| predicate(*u))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags.iter().rev() {
            if let Some(mut entry) = self.unacked.remove(tag) {
                entry.message.redelivered = true;
                self.ready.push_front(entry.message);
            }
        }
        tags.len()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_delivery_tag: u64,
    next_consumer_id: u64,
}

/// QueueDepth はキュー内のメッセージ件数を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    /// 配信待ち
    pub ready: usize,
    /// 配信済み・未確認
    pub unacked: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.ready + self.unacked
    }
}

/// InMemoryBroker はトピックエクスチェンジと永続キューのインメモリ実装。
pub struct InMemoryBroker {
    exchange: String,
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 永続キューを宣言し、バインディングを追加する。既存キューへの再宣言は冪等。
    pub fn declare_queue(&self, name: &str, bindings: &[String]) -> Result<(), MessagingError> {
        for pattern in bindings {
            validate_binding(pattern)?;
        }
        let mut state = self.lock();
        let queue = state.queues.entry(name.to_string()).or_default();
        for pattern in bindings {
            if !queue.bindings.contains(pattern) {
                queue.bindings.push(pattern.clone());
            }
        }
        tracing::debug!(
            exchange = %self.exchange,
            queue = %name,
            bindings = ?queue.bindings,
            "queue declared"
        );
        Ok(())
    }

    /// ルーティングキーに一致する全キューへメッセージを格納する。格納先キュー数を返す。
    pub fn publish_raw(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<usize, MessagingError> {
        validate_routing_key(routing_key)?;
        let routed = {
            let mut state = self.lock();
            let mut routed = 0usize;
            for queue in state.queues.values_mut() {
                if queue.is_bound_to(routing_key) {
                    queue.ready.push_back(StoredMessage {
                        routing_key: routing_key.to_string(),
                        payload: payload.clone(),
                        mode,
                        redelivered: false,
                        delivery_count: 0,
                    });
                    routed += 1;
                }
            }
            routed
        };
        if routed == 0 {
            tracing::warn!(
                exchange = %self.exchange,
                routing_key = %routing_key,
                "message unroutable, dropped"
            );
        } else {
            self.notify.notify_waiters();
        }
        Ok(routed)
    }

    /// キューを購読するサブスクライバーを生成する。
    pub fn subscribe(self: &Arc<Self>, queue: &str) -> Result<InMemorySubscriber, MessagingError> {
        let consumer_id = {
            let mut state = self.lock();
            if !state.queues.contains_key(queue) {
                return Err(MessagingError::QueueNotFound(queue.to_string()));
            }
            state.next_consumer_id += 1;
            state.next_consumer_id
        };
        Ok(InMemorySubscriber {
            broker: Arc::clone(self),
            queue: queue.to_string(),
            consumer_id,
        })
    }

    /// キューの件数を返す。未宣言のキューは None。
    pub fn queue_depth(&self, queue: &str) -> Option<QueueDepth> {
        let state = self.lock();
        state.queues.get(queue).map(|q| QueueDepth {
            ready: q.ready.len(),
            unacked: q.unacked.len(),
        })
    }

    /// ブローカー再起動を模擬する。
    ///
    /// 永続メッセージは保持し、未確認のものは再配信扱いでキュー先頭へ戻す。
    /// 非永続メッセージは破棄する。再起動前の配信タグは無効になる。
    pub fn restart(&self) {
        let mut dropped = 0usize;
        {
            let mut state = self.lock();
            for queue in state.queues.values_mut() {
                queue.requeue_where(|_| true);
                let before = queue.ready.len();
                queue
                    .ready
                    .retain(|m| m.mode == DeliveryMode::Persistent);
                dropped += before - queue.ready.len();
            }
        }
        tracing::info!(
            exchange = %self.exchange,
            transient_dropped = dropped,
            "in-memory broker restarted"
        );
        self.notify.notify_waiters();
    }

    fn try_take(&self, queue: &str, consumer_id: u64) -> Result<Option<Delivery>, MessagingError> {
        let mut state = self.lock();
        state.next_delivery_tag += 1;
        let tag = state.next_delivery_tag;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
        let Some(mut message) = q.ready.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;
        let delivery = Delivery {
            delivery_tag: tag,
            routing_key: message.routing_key.clone(),
            payload: message.payload.clone(),
            redelivered: message.redelivered,
            delivery_count: message.delivery_count,
        };
        q.unacked.insert(
            tag,
            Unacked {
                consumer_id,
                message,
            },
        );
        Ok(Some(delivery))
    }

    fn settle(
        &self,
        queue: &str,
        consumer_id: u64,
        tag: u64,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        {
            let mut state = self.lock();
            let q = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
            let owned = q
                .unacked
                .get(&tag)
                .is_some_and(|u| u.consumer_id == consumer_id);
            if !owned {
                return Err(MessagingError::UnknownDeliveryTag(tag));
            }
            let Some(mut entry) = q.unacked.remove(&tag) else {
                return Err(MessagingError::UnknownDeliveryTag(tag));
            };
            if !requeue {
                return Ok(());
            }
            entry.message.redelivered = true;
            q.ready.push_front(entry.message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn release_consumer(&self, queue: &str, consumer_id: u64) {
        let requeued = {
            let mut state = self.lock();
            state
                .queues
                .get_mut(queue)
                .map_or(0, |q| q.requeue_where(|u| u.consumer_id == consumer_id))
        };
        if requeued > 0 {
            tracing::info!(
                queue = %queue,
                consumer_id,
                requeued,
                "consumer released, unacked deliveries requeued"
            );
            self.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), MessagingError> {
        let payload = envelope.to_bytes()?;
        self.publish_raw(routing_key, payload, DeliveryMode::Persistent)?;
        Ok(())
    }
}

/// InMemorySubscriber は InMemoryBroker の1キューに対するコンシューマー。
///
/// 破棄されると未確認の配信はキューへ戻る（コンシューマー停止時の挙動）。
pub struct InMemorySubscriber {
    broker: Arc<InMemoryBroker>,
    queue: String,
    consumer_id: u64,
}

impl InMemorySubscriber {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 配信待ちがあれば即座に受信する。無ければ None。
    pub fn try_receive(&self) -> Result<Option<Delivery>, MessagingError> {
        self.broker.try_take(&self.queue, self.consumer_id)
    }
}

#[async_trait]
impl EventSubscriber for InMemorySubscriber {
    async fn receive(&self) -> Result<Delivery, MessagingError> {
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(delivery) = self.try_receive()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        self.broker
            .settle(&self.queue, self.consumer_id, delivery.delivery_tag, false)
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError> {
        self.broker
            .settle(&self.queue, self.consumer_id, delivery.delivery_tag, requeue)
    }
}

impl Drop for InMemorySubscriber {
    fn drop(&mut self) {
        self.broker.release_consumer(&self.queue, self.consumer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with_queue(queue: &str, bindings: &[&str]) -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker::new("copilot.events"));
        let bindings: Vec<String> = bindings.iter().map(|b| (*b).to_string()).collect();
        broker.declare_queue(queue, &bindings).unwrap();
        broker
    }

    #[test]
    fn test_publish_routes_to_matching_queues() {
        let broker = broker_with_queue("chunking", &["json.parsed"]);
        broker
            .declare_queue("failures", &["*.failed".to_string()])
            .unwrap();

        let routed = broker
            .publish_raw("json.parsed", b"a".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        assert_eq!(routed, 1);
        let routed = broker
            .publish_raw("parsing.failed", b"b".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        assert_eq!(routed, 1);
        let routed = broker
            .publish_raw("chunks.prepared", b"c".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        assert_eq!(routed, 0);

        assert_eq!(broker.queue_depth("chunking").unwrap().ready, 1);
        assert_eq!(broker.queue_depth("failures").unwrap().ready, 1);
    }

    #[test]
    fn test_declare_queue_is_idempotent() {
        let broker = broker_with_queue("q", &["json.parsed"]);
        broker
            .declare_queue("q", &["json.parsed".to_string(), "chunks.*".to_string()])
            .unwrap();
        broker
            .publish_raw("chunks.prepared", b"x".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        assert_eq!(broker.queue_depth("q").unwrap().ready, 1);
    }

    #[test]
    fn test_subscribe_unknown_queue() {
        let broker = Arc::new(InMemoryBroker::new("copilot.events"));
        assert!(matches!(
            broker.subscribe("missing"),
            Err(MessagingError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = broker_with_queue("q", &["json.parsed"]);
        broker
            .publish_raw("json.parsed", b"x".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        let sub = broker.subscribe("q").unwrap();

        let delivery = sub.receive().await.unwrap();
        assert_eq!(delivery.delivery_count, 1);
        assert!(!delivery.redelivered);
        assert_eq!(
            broker.queue_depth("q").unwrap(),
            QueueDepth { ready: 0, unacked: 1 }
        );

        sub.ack(&delivery).await.unwrap();
        assert_eq!(broker.queue_depth("q").unwrap().total(), 0);

        let again = sub.ack(&delivery).await;
        assert!(matches!(again, Err(MessagingError::UnknownDeliveryTag(_))));
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers_first() {
        let broker = broker_with_queue("q", &["#"]);
        broker
            .publish_raw("a.b", b"first".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        broker
            .publish_raw("a.b", b"second".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        let sub = broker.subscribe("q").unwrap();

        let d1 = sub.receive().await.unwrap();
        sub.nack(&d1, true).await.unwrap();

        let d2 = sub.receive().await.unwrap();
        assert_eq!(d2.payload, b"first".to_vec());
        assert!(d2.redelivered);
        assert_eq!(d2.delivery_count, 2);
        assert_ne!(d1.delivery_tag, d2.delivery_tag);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_discards() {
        let broker = broker_with_queue("q", &["#"]);
        broker
            .publish_raw("a.b", b"x".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        let sub = broker.subscribe("q").unwrap();
        let d = sub.receive().await.unwrap();
        sub.nack(&d, false).await.unwrap();
        assert_eq!(broker.queue_depth("q").unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_requeues_unacked() {
        let broker = broker_with_queue("q", &["#"]);
        broker
            .publish_raw("a.b", b"x".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        {
            let sub = broker.subscribe("q").unwrap();
            let _ = sub.receive().await.unwrap();
            assert_eq!(broker.queue_depth("q").unwrap().unacked, 1);
        }
        assert_eq!(
            broker.queue_depth("q").unwrap(),
            QueueDepth { ready: 1, unacked: 0 }
        );

        let sub = broker.subscribe("q").unwrap();
        let d = sub.receive().await.unwrap();
        assert!(d.redelivered);
        assert_eq!(d.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_other_consumer_cannot_ack() {
        let broker = broker_with_queue("q", &["#"]);
        broker
            .publish_raw("a.b", b"x".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        let sub1 = broker.subscribe("q").unwrap();
        let sub2 = broker.subscribe("q").unwrap();
        let d = sub1.receive().await.unwrap();
        assert!(sub2.ack(&d).await.is_err());
        assert!(sub1.ack(&d).await.is_ok());
    }

    #[tokio::test]
    async fn test_restart_keeps_persistent_and_drops_transient() {
        let broker = broker_with_queue("q", &["#"]);
        broker
            .publish_raw("a.b", b"persistent".to_vec(), DeliveryMode::Persistent)
            .unwrap();
        broker
            .publish_raw("a.b", b"transient".to_vec(), DeliveryMode::Transient)
            .unwrap();
        broker
            .publish_raw("a.b", b"inflight".to_vec(), DeliveryMode::Persistent)
            .unwrap();

        let sub = broker.subscribe("q").unwrap();
        let d1 = sub.receive().await.unwrap();
        assert_eq!(d1.payload, b"persistent".to_vec());

        broker.restart();
        assert_eq!(
            broker.queue_depth("q").unwrap(),
            QueueDepth { ready: 2, unacked: 0 }
        );
        // 再起動前のタグは無効
        assert!(sub.ack(&d1).await.is_err());

        let r1 = sub.receive().await.unwrap();
        assert_eq!(r1.payload, b"persistent".to_vec());
        assert!(r1.redelivered);
        let r2 = sub.receive().await.unwrap();
        assert_eq!(r2.payload, b"inflight".to_vec());
        assert!(!r2.redelivered);
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let broker = broker_with_queue("q", &["json.parsed"]);
        let sub = broker.subscribe("q").unwrap();

        let publisher = Arc::clone(&broker);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher
                .publish_raw("json.parsed", b"late".to_vec(), DeliveryMode::Persistent)
                .unwrap();
        });

        let d = tokio::time::timeout(std::time::Duration::from_secs(2), sub.receive())
            .await
            .expect("receive timed out")
            .unwrap();
        assert_eq!(d.payload, b"late".to_vec());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_trait_is_persistent() {
        let broker = broker_with_queue("q", &["json.parsed"]);
        let envelope = EventEnvelope::from_event(&crate::event::JsonParsed::single(
            "a", "m", "t", 0.0,
        ))
        .unwrap();
        broker.publish("json.parsed", &envelope).await.unwrap();
        broker.restart();
        assert_eq!(broker.queue_depth("q").unwrap().ready, 1);
    }
}
