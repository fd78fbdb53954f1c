use serde_json::Value;

use crate::store::DocumentStore;
use crate::StoreError;

/// InsertOutcome は冪等挿入の結果を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// 同一 ID のドキュメントが既に存在した（再配信による重複）
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// 重複キーを成功として扱う挿入。
///
/// ID は内容から決定的に導出されている前提のため、既存ドキュメントは同一内容とみなす。
pub async fn insert_idempotent(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    document: Value,
) -> Result<InsertOutcome, StoreError> {
    match store.insert(collection, id, document).await {
        Ok(()) => Ok(InsertOutcome::Inserted),
        Err(e) if e.is_duplicate_key() => {
            tracing::debug!(collection, id, "document already exists, skipping insert");
            Ok(InsertOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}
