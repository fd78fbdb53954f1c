use std::sync::Arc;

use serde::Deserialize;

use crate::memory::InMemoryDocumentStore;
use crate::store::DocumentStore;
use crate::StoreError;

/// DatabaseConfig はデータベース接続設定。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_open_conns() -> u32 {
    25
}

impl DatabaseConfig {
    /// PostgreSQL接続URLを構築する。
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

/// 設定に応じてドキュメントストアを開く。
///
/// DATABASE_URL 環境変数は設定ファイルより優先する。どちらも無ければインメモリストアを使う。
pub async fn open_store(
    config: Option<&DatabaseConfig>,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| config.map(DatabaseConfig::connection_url));
    let max_connections = config.map_or_else(default_max_open_conns, |c| c.max_open_conns);

    match url {
        Some(url) => connect_postgres(&url, max_connections).await,
        None => {
            tracing::info!("no database configured, using in-memory document store");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(
    url: &str,
    max_connections: u32,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    tracing::info!("connecting to database");
    let store = crate::postgres_store::PostgresDocumentStore::connect(url, max_connections).await?;
    store.ensure_schema().await?;
    tracing::info!("database connection pool established");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(
    _url: &str,
    _max_connections: u32,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    Err(StoreError::StorageError(
        "database configured but the \"postgres\" feature is disabled".to_string(),
    ))
}
