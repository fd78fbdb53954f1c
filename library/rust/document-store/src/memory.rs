use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{matches_filter, validate_patch, with_id, DocumentStore, Filter};
use crate::StoreError;

type Collection = BTreeMap<String, Value>;

#[derive(Clone)]
pub struct InMemoryDocumentStore {
    data: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// コレクション内のドキュメント数を返す（テスト用）
    pub async fn len(&self, collection: &str) -> usize {
        let map = self.data.read().await;
        map.get(collection).map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let document = with_id(id, document)?;
        let mut map = self.data.write().await;
        let docs = map.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), document);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let map = self.data.read().await;
        Ok(map.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let fields = validate_patch(&patch)?;
        let mut map = self.data.write().await;
        let document = map
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        for (field, value) in fields {
            document.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let map = self.data.read().await;
        let Some(docs) = map.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|doc| matches_filter(doc, filter))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let map = self.data.read().await;
        let count = map.get(collection).map_or(0, |docs| {
            docs.values().filter(|doc| matches_filter(doc, filter)).count()
        });
        Ok(count as u64)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut map = self.data.write().await;
        Ok(map
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }
}
