use async_trait::async_trait;
use serde_json::Value;

use crate::StoreError;

/// トップレベルフィールドの包含条件。空なら全件に一致する。
///
/// PostgreSQL の jsonb `@>` と同じ意味で判定する。
/// ネストしたオブジェクトは指定したキーだけを比較し、配列は順序を問わない部分集合で一致する。
pub type Filter = serde_json::Map<String, Value>;

/// ドキュメント ID を格納するフィールド名。
pub const ID_FIELD: &str = "_id";

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// ドキュメントを挿入する（既存 ID は Err(DuplicateKey)）
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError>;
    /// ドキュメントを取得する
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    /// トップレベルフィールドを上書きマージする（存在しない ID は Err(NotFound)）
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;
    /// 条件に一致するドキュメントを ID 順に取得する
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError>;
    /// 条件に一致するドキュメント数を返す
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
    /// ドキュメントを削除する
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

/// ドキュメントが条件に一致するかを判定する。
pub fn matches_filter(document: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| {
        document
            .get(field)
            .is_some_and(|actual| contains(actual, expected))
    })
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, value)| {
            actual
                .get(key)
                .is_some_and(|inner| contains(inner, value))
        }),
        (Value::Array(actual), Value::Array(expected)) => expected
            .iter()
            .all(|value| actual.iter().any(|inner| contains(inner, value))),
        _ => actual == expected,
    }
}

/// 挿入用にドキュメントへ `_id` を設定する。オブジェクト以外はエラー。
pub fn with_id(id: &str, document: Value) -> Result<Value, StoreError> {
    match document {
        Value::Object(mut map) => {
            map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(StoreError::InvalidDocument(format!(
            "document must be a JSON object, got {other}"
        ))),
    }
}

/// 更新パッチを検証する。`_id` の変更は許可しない。
pub fn validate_patch(patch: &Value) -> Result<&serde_json::Map<String, Value>, StoreError> {
    let map = patch
        .as_object()
        .ok_or_else(|| StoreError::InvalidDocument("patch must be a JSON object".to_string()))?;
    if map.contains_key(ID_FIELD) {
        return Err(StoreError::InvalidDocument(
            "patch must not modify _id".to_string(),
        ));
    }
    Ok(map)
}
