use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("重複キーです: collection={collection}, id={id}")]
    DuplicateKey { collection: String, id: String },
    #[error("ドキュメントが見つかりません: collection={collection}, id={id}")]
    NotFound { collection: String, id: String },
    #[error("無効なドキュメント: {0}")]
    InvalidDocument(String),
    #[error("シリアライズエラー: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("ストレージエラー: {0}")]
    StorageError(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
