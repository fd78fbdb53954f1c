use serde::Deserialize;

/// Message は parsing サービスが保存したメッセージのうち、チャンク化に必要なフィールド。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub message_doc_id: String,
    pub archive_id: String,
    pub message_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub body_normalized: String,
}
