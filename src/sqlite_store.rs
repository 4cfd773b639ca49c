//! SQLite-backed [`DocumentStore`].
//!
//! Each collection is a slice of the `documents` table keyed by
//! `(collection, key)`. Bodies are stored as JSON text and equality filters
//! are evaluated in Rust after decoding.

use async_trait::async_trait;
use harvest_core::store::{
    keyed_document, DeleteResult, DocumentStore, Filter, ReplaceResult, StoreError,
};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query("SELECT key, body FROM documents WHERE collection = ? ORDER BY key")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| {
                let key: String = row.get("key");
                let body: String = row.get("body");
                Ok((key, serde_json::from_str(&body)?))
            })
            .collect()
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ping(&self) -> Result<bool, StoreError> {
        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(one == 1)
    }

    async fn find_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn replace_by_key(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        upsert: bool,
    ) -> Result<ReplaceResult, StoreError> {
        let document = keyed_document(document, key)?;
        let body = serde_json::to_string(&document)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        let result = match existing {
            Some(previous) => {
                let previous: Value = serde_json::from_str(&previous)?;
                sqlx::query(
                    "UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND key = ?",
                )
                .bind(&body)
                .bind(now)
                .bind(collection)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                ReplaceResult {
                    inserted_key: None,
                    matched_count: 1,
                    modified_count: u64::from(previous != document),
                }
            }
            None if upsert => {
                sqlx::query(
                    "INSERT INTO documents (collection, key, body, updated_at) VALUES (?, ?, ?, ?)",
                )
                .bind(collection)
                .bind(key)
                .bind(&body)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                ReplaceResult {
                    inserted_key: Some(key.to_string()),
                    matched_count: 0,
                    modified_count: 0,
                }
            }
            None => ReplaceResult::default(),
        };

        tx.commit().await.map_err(backend)?;
        Ok(result)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .load(collection)
            .await?
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        if filter.is_empty() {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            return Ok(n as u64);
        }
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<DeleteResult, StoreError> {
        if filter.is_empty() {
            let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
                .bind(collection)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            return Ok(DeleteResult {
                deleted_count: result.rows_affected(),
            });
        }

        let keys: Vec<String> = self
            .load(collection)
            .await?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key)
            .collect();

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for key in &keys {
            sqlx::query("DELETE FROM documents WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;

        Ok(DeleteResult {
            deleted_count: keys.len() as u64,
        })
    }
}
