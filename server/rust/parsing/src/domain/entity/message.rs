use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sender は From ヘッダーの表示名とアドレス。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    pub email: String,
}

/// MessageDocument は mbox から抽出した 1 メッセージ。messages コレクションに保存する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub message_doc_id: String,
    pub archive_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Sender,
    pub date: Option<String>,
    pub body_normalized: String,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 の16進表現の先頭16文字。
pub fn short_hash(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input)).chars().take(16).collect()
}

/// アーカイブ内のメッセージ ID から決定的なドキュメント ID を導出する。
pub fn message_doc_id(archive_id: &str, message_id: &str) -> String {
    short_hash(format!("{archive_id}:{message_id}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_doc_id_is_deterministic() {
        let a = message_doc_id("arc1", "abc@example.com");
        let b = message_doc_id("arc1", "abc@example.com");
        let c = message_doc_id("arc2", "abc@example.com");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
