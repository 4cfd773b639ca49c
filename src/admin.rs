//! `harvest admin`: backup, inspect and clear a collection.
//!
//! | Flags | Effect |
//! |-------|--------|
//! | `--stats-only` | print [`CollectionStats`] |
//! | `--backup-only` | write a backup file |
//! | `--confirm-clear` | back up, then delete every document |
//! | none | print a warning and do nothing |
//!
//! Backups are written to `[admin].backup_dir` as
//! `<collection>_backup_<YYYYmmdd_HHMMSS>.json`. A clear never runs when the
//! backup step failed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use harvest_core::store::{DocumentStore, Filter};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::persistence;

const SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub total_documents: u64,
    /// Field names of the first few documents, in key order.
    pub sample_fields: Vec<Vec<String>>,
    pub by_source: BTreeMap<String, u64>,
}

/// Write every document of `collection` into a timestamped file under `dir`.
///
/// Returns `None` without creating a file when the collection is empty.
pub async fn backup_collection(
    store: &Arc<dyn DocumentStore>,
    database: &str,
    collection: &str,
    dir: &Path,
) -> Result<Option<PathBuf>> {
    let documents = store
        .find(collection, &Filter::all())
        .await
        .with_context(|| format!("Failed to read collection {}", collection))?;
    if documents.is_empty() {
        warn!(collection, "Collection is empty, nothing to back up");
        return Ok(None);
    }

    let now = Utc::now();
    let backup = json!({
        "backup_info": {
            "collection_name": collection,
            "database_name": database,
            "backup_date": now,
            "total_documents": documents.len(),
        },
        "documents": documents,
    });

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create backup directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "{}_backup_{}.json",
        collection,
        now.format("%Y%m%d_%H%M%S")
    ));
    std::fs::write(&path, serde_json::to_string_pretty(&backup)?)
        .with_context(|| format!("Failed to write backup: {}", path.display()))?;

    info!(collection, documents = documents.len(), path = %path.display(), "Backup written");
    Ok(Some(path))
}

pub async fn collection_stats(
    store: &Arc<dyn DocumentStore>,
    collection: &str,
) -> Result<CollectionStats> {
    let documents = store.find(collection, &Filter::all()).await?;

    let sample_fields = documents
        .iter()
        .take(SAMPLE_SIZE)
        .map(|doc| match doc {
            Value::Object(obj) => obj.keys().cloned().collect(),
            _ => Vec::new(),
        })
        .collect();

    let mut by_source = BTreeMap::new();
    for doc in &documents {
        if let Some(source) = doc.get("source").and_then(Value::as_str) {
            *by_source.entry(source.to_string()).or_insert(0) += 1;
        }
    }

    Ok(CollectionStats {
        collection: collection.to_string(),
        total_documents: documents.len() as u64,
        sample_fields,
        by_source,
    })
}

/// Delete every document in `collection`. Without `confirm` nothing happens
/// and `0` is returned.
pub async fn clear_collection(
    store: &Arc<dyn DocumentStore>,
    collection: &str,
    confirm: bool,
) -> Result<u64> {
    if !confirm {
        warn!(collection, "Clear cancelled: confirmation required");
        return Ok(0);
    }
    let result = store.delete_many(collection, &Filter::all()).await?;
    info!(collection, deleted = result.deleted_count, "Collection cleared");
    Ok(result.deleted_count)
}

/// Entry point for `harvest admin`.
pub async fn run_admin(
    config: &Config,
    collection: Option<&str>,
    backup_only: bool,
    confirm_clear: bool,
    stats_only: bool,
) -> Result<()> {
    let collection = collection.unwrap_or(config.db.products_collection.as_str());
    let store = persistence::connect(&config.db)
        .await
        .context("Cannot run admin commands without a document store")?;
    let database = config.db.path.display().to_string();

    if stats_only {
        let stats = collection_stats(&store, collection).await?;
        print_stats(&stats);
        return Ok(());
    }

    if backup_only {
        match backup_collection(&store, &database, collection, &config.admin.backup_dir).await? {
            Some(path) => println!("Backup written to {}", path.display()),
            None => println!("Collection '{}' is empty; no backup written.", collection),
        }
        return Ok(());
    }

    if !confirm_clear {
        println!(
            "Refusing to clear '{}' without --confirm-clear. Use --backup-only or --stats-only for read-only operations.",
            collection
        );
        return Ok(());
    }

    let stats = collection_stats(&store, collection).await?;
    print_stats(&stats);
    if stats.total_documents == 0 {
        println!("Collection '{}' is already empty.", collection);
        return Ok(());
    }

    let Some(path) =
        backup_collection(&store, &database, collection, &config.admin.backup_dir).await?
    else {
        bail!("Backup of '{}' produced no file; not clearing", collection);
    };
    println!("Backup written to {}", path.display());

    let deleted = clear_collection(&store, collection, true).await?;
    println!("Deleted {} documents from '{}'.", deleted, collection);
    Ok(())
}

fn print_stats(stats: &CollectionStats) {
    println!("Collection: {}", stats.collection);
    println!("Documents:  {}", stats.total_documents);
    for (i, fields) in stats.sample_fields.iter().enumerate() {
        println!("Sample {} fields: {}", i + 1, fields.join(", "));
    }
    if !stats.by_source.is_empty() {
        println!("{:<20} COUNT", "SOURCE");
        for (source, count) in &stats.by_source {
            println!("{:<20} {}", source, count);
        }
    }
}
