use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    partition_key: String,
    value: Value,
}

/// Process-local store; documents iterate in id order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .filter(|entry| entry.partition_key == partition_key)
            .map(|entry| entry.value.clone()))
    }

    async fn find(
        &self,
        collection: &str,
        partition_key: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|entry| partition_key.is_none_or(|key| entry.partition_key == key))
            .map(|entry| entry.value.clone())
            .collect())
    }

    async fn save(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().insert(
            id.to_string(),
            Entry {
                partition_key: partition_key.to_string(),
                value,
            },
        );
        Ok(())
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        if docs
            .get(id)
            .is_some_and(|entry| entry.partition_key == partition_key)
        {
            docs.remove(id);
            return Ok(true);
        }
        Ok(false)
    }
}
