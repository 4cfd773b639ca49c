//! In-memory [`DocumentStore`] implementation for tests and dry runs.
//!
//! Collections are `BTreeMap`s behind a `std::sync::RwLock`, so reads come
//! back in key order exactly like the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{keyed_document, DeleteResult, DocumentStore, Filter, ReplaceResult, StoreError};

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-memory store.
pub struct InMemoryStore {
    collections: RwLock<Collections>,
    reachable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Make [`ping`](DocumentStore::ping) report the store as down.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> Result<bool, StoreError> {
        Ok(self.reachable.load(Ordering::SeqCst))
    }

    async fn find_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .read()?
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn replace_by_key(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        upsert: bool,
    ) -> Result<ReplaceResult, StoreError> {
        let document = keyed_document(document, key)?;
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();

        match docs.get(key) {
            Some(existing) => {
                let modified = u64::from(*existing != document);
                docs.insert(key.to_string(), document);
                Ok(ReplaceResult {
                    inserted_key: None,
                    matched_count: 1,
                    modified_count: modified,
                })
            }
            None if upsert => {
                docs.insert(key.to_string(), document);
                Ok(ReplaceResult {
                    inserted_key: Some(key.to_string()),
                    matched_count: 0,
                    modified_count: 0,
                })
            }
            None => Ok(ReplaceResult::default()),
        }
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .read()?
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .get(collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<DeleteResult, StoreError> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        Ok(DeleteResult {
            deleted_count: (before - docs.len()) as u64,
        })
    }
}
