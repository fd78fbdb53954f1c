//! PostgresDocumentStore: sqlx を使用した DocumentStore 実装。
//! feature = "postgres" で有効化される。

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::store::{validate_patch, with_id, DocumentStore, Filter};

/// 一意制約違反の SQLSTATE。
const UNIQUE_VIOLATION: &str = "23505";

const MIGRATION: &str = include_str!("../migrations/001_create_documents.sql");

/// PostgresDocumentStore は documents テーブルに JSONB でドキュメントを保持する。
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 接続 URL からプールを生成する。
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// documents テーブルが無ければ作成する。
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(())
    }
}

fn map_insert_error(e: sqlx::Error, collection: &str, id: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            }
        }
        _ => StoreError::StorageError(e.to_string()),
    }
}

fn to_limit(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let document = with_id(id, document)?;
        sqlx::query(r#"INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)"#)
            .bind(collection)
            .bind(id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, collection, id))?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(Value,)> =
            sqlx::query_as(r#"SELECT body FROM documents WHERE collection = $1 AND id = $2"#)
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(row.map(|(body,)| body))
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        validate_patch(&patch)?;
        // jsonb の || はトップレベルキーの上書きマージ
        let result = sqlx::query(
            r#"UPDATE documents
               SET body = body || $3, updated_at = NOW()
               WHERE collection = $1 AND id = $2"#,
        )
        .bind(collection)
        .bind(id)
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            r#"SELECT body FROM documents
               WHERE collection = $1 AND body @> $2
               ORDER BY id ASC
               LIMIT $3"#,
        )
        .bind(collection)
        .bind(Value::Object(filter.clone()))
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(rows.into_iter().map(|(body,)| body).collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM documents WHERE collection = $1 AND body @> $2"#,
        )
        .bind(collection)
        .bind(Value::Object(filter.clone()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(r#"DELETE FROM documents WHERE collection = $1 AND id = $2"#)
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
