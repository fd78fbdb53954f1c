use crate::error::MessagingError;
use crate::event::EventEnvelope;

/// Delivery はブローカーから受信した1回分の配信を表す。
///
/// ack / nack されるまでブローカー側では未確認（unacked）として保持される。
#[derive(Debug, Clone)]
pub struct Delivery {
    /// 配信タグ（ack / nack で使用する）
    pub delivery_tag: u64,
    /// ルーティングキー
    pub routing_key: String,
    /// メッセージペイロード
    pub payload: Vec<u8>,
    /// 再配信かどうか
    pub redelivered: bool,
    /// このメッセージの累計配信回数（初回は 1）
    pub delivery_count: u32,
}

impl Delivery {
    /// ペイロードをイベントエンベロープとしてデシリアライズする。
    pub fn envelope(&self) -> Result<EventEnvelope, MessagingError> {
        EventEnvelope::from_bytes(&self.payload)
    }
}

/// EventSubscriber は永続キューからの手動 ack 付き受信インターフェース。
///
/// 自動 ack は行わない。呼び出し側は自身の出力を永続化した後にのみ `ack` する。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait::async_trait]
pub trait EventSubscriber: Send + Sync {
    /// 次の配信を受信する（メッセージが来るまで待機する）。
    async fn receive(&self) -> Result<Delivery, MessagingError>;

    /// 配信を確認済みにする。未知・確定済みのタグはエラー。
    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError>;

    /// 配信を否認する。requeue = true ならキュー先頭へ戻し、false なら破棄する。
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError>;
}
