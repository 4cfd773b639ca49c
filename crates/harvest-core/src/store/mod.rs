//! Storage abstraction for product-harvest.
//!
//! The [`DocumentStore`] trait is the document-store contract the pipeline
//! depends on: a liveness probe, keyed replace-with-upsert, and a handful of
//! read/delete helpers used by the administrative tooling. Documents are
//! JSON objects grouped into named collections and keyed by a string `_id`.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field under which every stored document carries its key.
pub const KEY_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed its liveness probe.
    #[error("document store unreachable: {0}")]
    Connection(String),
    #[error("document store operation failed: {0}")]
    Backend(String),
    #[error("documents must be JSON objects (got {0})")]
    NotAnObject(&'static str),
    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of [`DocumentStore::replace_by_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceResult {
    /// Set when the key did not exist and the document was inserted.
    pub inserted_key: Option<String>,
    /// 1 when an existing document had this key, else 0.
    pub matched_count: u64,
    /// 1 when an existing document was changed by the write, else 0.
    pub modified_count: u64,
}

/// Outcome of [`DocumentStore::delete_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Top-level field equality filter. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Map<String, Value>,
}

impl Filter {
    /// Filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](DocumentStore::ping) | Liveness probe |
/// | [`find_by_key`](DocumentStore::find_by_key) | Read one document |
/// | [`replace_by_key`](DocumentStore::replace_by_key) | Wholesale replace, optionally inserting |
/// | [`find`](DocumentStore::find) | Read all matching documents, key order |
/// | [`count`](DocumentStore::count) | Count matching documents |
/// | [`delete_many`](DocumentStore::delete_many) | Delete matching documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<bool, StoreError>;

    async fn find_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document stored under `key`. With `upsert`, a missing key
    /// is inserted; without it the call is a no-op reporting zero matches.
    async fn replace_by_key(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        upsert: bool,
    ) -> Result<ReplaceResult, StoreError>;

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter)
        -> Result<DeleteResult, StoreError>;
}

/// Return `document` with its `_id` forced to `key`.
pub fn keyed_document(document: &Value, key: &str) -> Result<Value, StoreError> {
    let mut obj = match document {
        Value::Object(obj) => obj.clone(),
        Value::Null => return Err(StoreError::NotAnObject("null")),
        Value::Bool(_) => return Err(StoreError::NotAnObject("boolean")),
        Value::Number(_) => return Err(StoreError::NotAnObject("number")),
        Value::String(_) => return Err(StoreError::NotAnObject("string")),
        Value::Array(_) => return Err(StoreError::NotAnObject("array")),
    };
    obj.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
    Ok(Value::Object(obj))
}
