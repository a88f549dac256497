//! Narrow document store contract the engine depends on.

mod memory;
#[cfg(feature = "store-sqlite")]
mod sqlite_store;
mod state_file;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::entities::Document;

pub use memory::MemoryStore;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
pub use state_file::{StateFile, StateFileError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} document not found: {id}")]
    NotFound { collection: &'static str, id: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "store-sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("store task failed: {err}"))
    }
}

/// Raw JSON documents keyed by `(collection, id)` and tagged with a
/// partition key.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Every document of `collection`, optionally restricted to one partition.
    async fn find(
        &self,
        collection: &str,
        partition_key: Option<&str>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert or replace.
    async fn save(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn delete(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<bool, StoreError>;
}

/// Typed handle over a shared [`DocumentStore`]; cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// `partition_key` defaults to `id`.
    pub async fn try_get<T: Document>(
        &self,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<Option<T>, StoreError> {
        let partition_key = partition_key.unwrap_or(id);
        match self.backend.get(T::COLLECTION, id, partition_key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get<T: Document>(
        &self,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<T, StoreError> {
        self.try_get(id, partition_key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            })
    }

    pub async fn find<T, F>(
        &self,
        partition_key: Option<&str>,
        predicate: F,
    ) -> Result<Vec<T>, StoreError>
    where
        T: Document,
        F: Fn(&T) -> bool + Send,
    {
        let mut out = Vec::new();
        for value in self.backend.find(T::COLLECTION, partition_key).await? {
            let doc: T = serde_json::from_value(value)?;
            if predicate(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    pub async fn save<T: Document>(&self, doc: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc)?;
        self.backend
            .save(T::COLLECTION, doc.id(), doc.partition_key(), value)
            .await
    }

    pub async fn delete<T: Document>(&self, doc: &T) -> Result<bool, StoreError> {
        self.backend
            .delete(T::COLLECTION, doc.id(), doc.partition_key())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Invocation, Project, User};

    #[tokio::test]
    async fn typed_round_trip_respects_partitions() {
        let store = Store::memory();
        let project = Project::new("u1", "Spelling", "fix spelling");
        store.save(&project).await.expect("save");

        let loaded: Project = store
            .get(&project.id, Some("u1"))
            .await
            .expect("get");
        assert_eq!(loaded, project);

        assert!(
            store
                .try_get::<Project>(&project.id, Some("u2"))
                .await
                .expect("get")
                .is_none()
        );
        assert!(matches!(
            store.get::<Project>(&project.id, None).await,
            Err(StoreError::NotFound { collection: "projects", .. })
        ));
    }

    #[tokio::test]
    async fn find_filters_by_partition_and_predicate() {
        let store = Store::memory();
        let mut a = Project::new("u1", "A", "a");
        a.active = false;
        let b = Project::new("u1", "B", "b");
        let c = Project::new("u2", "C", "c");
        for project in [&a, &b, &c] {
            store.save(project).await.expect("save");
        }

        let mine = store
            .find::<Project, _>(Some("u1"), |_| true)
            .await
            .expect("find");
        assert_eq!(mine.len(), 2);

        let active = store
            .find::<Project, _>(None, |p| p.active)
            .await
            .expect("find");
        assert_eq!(active.len(), 2);

        let none = store
            .find::<Invocation, _>(None, |_| true)
            .await
            .expect("find");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn save_replaces_and_delete_removes() {
        let store = Store::memory();
        let mut user = User::new("u1", "octocat");
        store.save(&user).await.expect("save");
        user.usage.credits_used = 7;
        store.save(&user).await.expect("save");

        let loaded: User = store.get("u1", None).await.expect("get");
        assert_eq!(loaded.usage.credits_used, 7);

        assert!(store.delete(&user).await.expect("delete"));
        assert!(!store.delete(&user).await.expect("delete"));
    }
}
