//! copilot-document-store: コレクション単位の JSON ドキュメントストア。
//!
//! パイプラインの各段はドキュメント ID を内容から決定的に導出するため、
//! 再配信による重複挿入は `DuplicateKey` として検出され、`insert_idempotent` で成功に変換される。

pub mod config;
pub mod error;
pub mod idempotent;
pub mod memory;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres_store;

pub use config::{open_store, DatabaseConfig};
pub use error::StoreError;
pub use idempotent::{insert_idempotent, InsertOutcome};
pub use memory::InMemoryDocumentStore;
pub use store::{matches_filter, DocumentStore, Filter, ID_FIELD};

#[cfg(feature = "postgres")]
pub use postgres_store::PostgresDocumentStore;

#[cfg(feature = "mock")]
pub use store::MockDocumentStore;
