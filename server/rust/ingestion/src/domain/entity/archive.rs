use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// ArchiveStatus はアーカイブの処理状態。pending から processed / failed へ遷移する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Pending,
    Processed,
    Failed,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive は取り込んだメールアーカイブ 1 ファイル分の記録。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub archive_id: String,
    pub source: String,
    pub file_path: String,
    pub file_size_bytes: u64,
    pub file_hash_sha256: String,
    pub status: ArchiveStatus,
    #[serde(default)]
    pub message_count: usize,
    pub ingestion_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Archive {
    /// ファイル内容から Archive を生成する。ID は内容の SHA-256 から決定的に導出する。
    pub fn from_content(source: &str, file_path: &Path, content: &[u8], now: DateTime<Utc>) -> Self {
        let hash = hex::encode(Sha256::digest(content));
        Self {
            archive_id: archive_id_from_hash(&hash),
            source: source.to_string(),
            file_path: file_path.display().to_string(),
            file_size_bytes: content.len() as u64,
            file_hash_sha256: hash,
            status: ArchiveStatus::Pending,
            message_count: 0,
            ingestion_date: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ArchiveStatus::Pending
    }
}

/// SHA-256 の16進表現の先頭16文字をアーカイブ ID とする。
pub fn archive_id_from_hash(hash_hex: &str) -> String {
    hash_hex.chars().take(16).collect()
}
