//! Idempotent writes of normalized products into the document store.
//!
//! [`connect`] opens the SQLite-backed store, applies the schema and probes
//! it once; any failure there is a [`StoreError::Connection`] and aborts the
//! invocation. After that, [`ProductRepository`] never lets a single bad
//! record stop a batch: failures are logged and counted in [`BatchStats`].
//!
//! Every write replaces the whole document under its identity key. The
//! stored `created_at` survives replacement, `updated_at` always moves
//! forward, and a record that carries no extraction timestamp inherits the
//! stored one so re-ingesting it is reported as [`UpsertOutcome::Unchanged`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_core::models::{ProductDocument, RawRecord, RecordError};
use harvest_core::store::{DocumentStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DbConfig;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode document {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

/// Open the store, apply the schema and check it answers.
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let pool = db::connect(config)
        .await
        .map_err(|e| StoreError::Connection(format!("{}: {:#}", config.path.display(), e)))?;
    migrate::apply(&pool)
        .await
        .map_err(|e| StoreError::Connection(format!("schema setup failed: {:#}", e)))?;

    let store = SqliteStore::new(pool);
    if !store.ping().await? {
        return Err(StoreError::Connection(
            "liveness probe returned an unexpected answer".to_string(),
        ));
    }

    info!(path = %config.path.display(), "Connected to document store");
    Ok(Arc::new(store))
}

/// Result of one [`ProductRepository::upsert_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Written, but the content matches what was already stored.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errors: u64,
}

impl BatchStats {
    /// Records that ended up stored, whatever their classification.
    pub fn succeeded(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Writes products into one collection of a shared store handle.
#[derive(Clone)]
pub struct ProductRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl ProductRepository {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Replace the document stored under `document.id`, inserting it if absent.
    pub async fn upsert_one(
        &self,
        mut document: ProductDocument,
    ) -> Result<UpsertOutcome, PersistError> {
        let previous: Option<ProductDocument> = self
            .store
            .find_by_key(&self.collection, &document.id)
            .await?
            .and_then(|value| match serde_json::from_value(value) {
                Ok(previous) => Some(previous),
                Err(e) => {
                    warn!(key = %document.id, error = %e, "Stored document does not decode, replacing it");
                    None
                }
            });

        if let Some(previous) = &previous {
            document.created_at = previous.created_at;
            if document.extraction_date_defaulted {
                document.extraction_date = previous.extraction_date.clone();
            }
        }

        let body = serde_json::to_value(&document).map_err(|source| PersistError::Encode {
            key: document.id.clone(),
            source,
        })?;
        let result = self
            .store
            .replace_by_key(&self.collection, &document.id, &body, true)
            .await?;

        let outcome = if result.inserted_key.is_some() {
            UpsertOutcome::Inserted
        } else if previous.is_some_and(|p| p.same_content(&document)) {
            UpsertOutcome::Unchanged
        } else {
            UpsertOutcome::Updated
        };
        debug!(key = %document.id, ?outcome, "Upserted product");
        Ok(outcome)
    }

    /// Normalize `record` with `now` as the write time, then upsert it.
    pub async fn upsert_record_at(
        &self,
        record: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, PersistError> {
        let document = ProductDocument::from_record(record, now)?;
        self.upsert_one(document).await
    }

    pub async fn upsert_record(&self, record: &RawRecord) -> Result<UpsertOutcome, PersistError> {
        self.upsert_record_at(record, Utc::now()).await
    }

    /// Upsert every record in order. Failures are counted, never raised.
    pub async fn upsert_batch(&self, records: &[RawRecord]) -> BatchStats {
        let mut stats = BatchStats::default();
        for (index, record) in records.iter().enumerate() {
            match self.upsert_record(record).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.errors += 1;
                    warn!(index, error = %e, "Failed to store record");
                }
            }
        }
        info!(
            collection = %self.collection,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            errors = stats.errors,
            "Batch stored"
        );
        stats
    }
}
