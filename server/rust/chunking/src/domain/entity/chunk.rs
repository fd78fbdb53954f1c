use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chunk はメッセージ本文を単語ウィンドウで分割した 1 区間。chunks コレクションに保存する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub message_doc_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub archive_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    /// 単語単位の開始位置（含む）
    pub start_offset: usize,
    /// 単語単位の終了位置（含まない）
    pub end_offset: usize,
    pub embedding_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// メッセージとチャンク番号から決定的なチャンク ID を導出する。
pub fn chunk_id(message_doc_id: &str, chunk_index: usize) -> String {
    hex::encode(Sha256::digest(format!("{message_doc_id}:{chunk_index}").as_bytes()))
        .chars()
        .take(16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        assert_eq!(chunk_id("m1", 0), chunk_id("m1", 0));
        assert_ne!(chunk_id("m1", 0), chunk_id("m1", 1));
        assert_ne!(chunk_id("m1", 0), chunk_id("m2", 0));
        assert_eq!(chunk_id("m1", 0).len(), 16);
    }
}
