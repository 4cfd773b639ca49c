//! `harvest upload`: store records from a file or an inline JSON string,
//! bypassing the source runner.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use harvest_core::store::DocumentStore;

use crate::artifact::{self, ArtifactRecords};
use crate::config::Config;
use crate::persistence::{self, BatchStats, ProductRepository};

/// Upsert already-parsed records, logging any skipped lines.
pub async fn upload_records(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    parsed: ArtifactRecords,
) -> BatchStats {
    for line_error in &parsed.line_errors {
        tracing::warn!(line = line_error.line, error = %line_error.message, "Skipping invalid line");
    }
    let repository = ProductRepository::new(store, collection);
    let mut stats = repository.upsert_batch(&parsed.records).await;
    stats.errors += parsed.line_errors.len() as u64;
    stats
}

/// Read `path` with the artifact reader rules and upsert its records.
pub async fn upload_file(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    path: &Path,
) -> Result<BatchStats> {
    let parsed = artifact::read_records(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(upload_records(store, collection, parsed).await)
}

/// Parse an inline JSON payload (array, object or JSON-Lines) and upsert it.
pub async fn upload_json(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    json: &str,
) -> Result<BatchStats> {
    let parsed = artifact::parse_records(json)
        .map_err(|reason| anyhow::anyhow!("Invalid --json payload: {}", reason))?;
    Ok(upload_records(store, collection, parsed).await)
}

/// Entry point for `harvest upload`.
pub async fn run_upload(config: &Config, file: Option<&Path>, inline: Option<&str>) -> Result<()> {
    let store = persistence::connect(&config.db)
        .await
        .context("Cannot upload without a document store")?;
    let collection = config.db.products_collection.as_str();
    let stats = match (file, inline) {
        (Some(path), None) => upload_file(store, collection, path).await?,
        (None, Some(json)) => upload_json(store, collection, json).await?,
        _ => bail!("Pass exactly one of --file or --json"),
    };

    println!("{:<10} {}", "inserted", stats.inserted);
    println!("{:<10} {}", "updated", stats.updated);
    println!("{:<10} {}", "unchanged", stats.unchanged);
    println!("{:<10} {}", "errors", stats.errors);
    Ok(())
}
