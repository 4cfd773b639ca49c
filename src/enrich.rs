//! `harvest enrich`: attach embedding vectors to stored products.
//!
//! For every product a descriptive text is embedded and stored as
//! `emb_<product_id>` in the embeddings collection. A failure for one
//! product is logged and counted; the batch always runs to the end and
//! finishes by writing one record into the metadata collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use harvest_core::store::{DocumentStore, Filter, KEY_FIELD};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{product_text, EmbeddingClient, OllamaClient};
use crate::persistence;

#[derive(Debug, Clone, Serialize)]
pub struct EnrichReport {
    pub batch_id: String,
    pub total_products: u64,
    pub successful_embeddings: u64,
    pub failed_embeddings: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub model: String,
}

impl EnrichReport {
    pub fn success_rate(&self) -> f64 {
        if self.total_products == 0 {
            return 0.0;
        }
        self.successful_embeddings as f64 / self.total_products as f64 * 100.0
    }
}

/// Embed up to `limit` products from `products_collection`.
pub async fn enrich_products(
    store: &Arc<dyn DocumentStore>,
    client: &dyn EmbeddingClient,
    products_collection: &str,
    config: &EmbeddingConfig,
    limit: Option<usize>,
) -> Result<EnrichReport> {
    let start_time = Utc::now();
    let clock = Instant::now();
    let batch_id = format!("batch_{}", start_time.format("%Y%m%d_%H%M%S"));

    let mut products = store
        .find(products_collection, &Filter::all())
        .await
        .context("Failed to load products")?;
    if let Some(limit) = limit {
        products.truncate(limit);
    }
    info!(batch_id = %batch_id, products = products.len(), "Embedding products");

    let delay = Duration::from_millis(config.delay_ms);
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for (index, product) in products.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(product_id) = product_key(product) else {
            warn!(index, "Skipping product without an id");
            failed += 1;
            continue;
        };
        let text = product_text(product);

        match client.embed(&text).await {
            Ok(vector) => {
                let dimension = vector.len();
                let doc = json!({
                    "product_id": product_id,
                    "embedding_dimension": dimension,
                    "embedding": vector,
                    "embedding_text": text,
                    "embedding_model": client.model_name(),
                    "generated_at": Utc::now(),
                });
                let key = format!("emb_{}", product_id);
                match store
                    .replace_by_key(&config.collection, &key, &doc, true)
                    .await
                {
                    Ok(_) => succeeded += 1,
                    Err(e) => {
                        warn!(product_id = %product_id, error = %e, "Failed to store embedding");
                        failed += 1;
                    }
                }
            }
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "Failed to embed product");
                failed += 1;
            }
        }

        if (index + 1) % 10 == 0 {
            info!(done = index + 1, total = products.len(), "Embedding progress");
        }
    }

    let report = EnrichReport {
        batch_id,
        total_products: products.len() as u64,
        successful_embeddings: succeeded,
        failed_embeddings: failed,
        start_time,
        end_time: Utc::now(),
        duration_seconds: clock.elapsed().as_secs_f64(),
        model: client.model_name().to_string(),
    };

    let mut metadata = serde_json::to_value(&report)?;
    if let Value::Object(obj) = &mut metadata {
        obj.insert("success_rate".to_string(), json!(report.success_rate()));
    }
    store
        .replace_by_key(&config.metadata_collection, &report.batch_id, &metadata, true)
        .await
        .context("Failed to store embedding batch metadata")?;

    Ok(report)
}

fn product_key(product: &Value) -> Option<String> {
    ["product_id", KEY_FIELD]
        .iter()
        .filter_map(|k| product.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Entry point for `harvest enrich`.
pub async fn run_enrich(config: &Config, limit: Option<usize>) -> Result<()> {
    let store = persistence::connect(&config.db)
        .await
        .context("Cannot enrich without a document store")?;
    let client = OllamaClient::new(&config.embedding)?;
    client
        .verify()
        .await
        .with_context(|| format!("Embedding service not reachable at {}", config.embedding.url))?;

    let report = enrich_products(
        &store,
        &client,
        &config.db.products_collection,
        &config.embedding,
        limit,
    )
    .await?;

    println!("Embedding batch {}", report.batch_id);
    println!("  products:  {}", report.total_products);
    println!("  succeeded: {}", report.successful_embeddings);
    println!("  failed:    {}", report.failed_embeddings);
    println!("  success:   {:.1}%", report.success_rate());
    println!("  duration:  {:.1}s", report.duration_seconds);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use async_trait::async_trait;
    use harvest_core::store::memory::InMemoryStore;

    /// Fails for any text mentioning "broken".
    struct FakeClient;

    #[async_trait]
    impl EmbeddingClient for FakeClient {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("broken") {
                return Err(EmbeddingError::Empty);
            }
            Ok(vec![1.0, 2.0, 3.0])
        }
    }

    async fn seeded() -> Arc<dyn DocumentStore> {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        for (id, name) in [("a_1", "TV one"), ("a_2", "broken TV"), ("a_3", "TV three")] {
            store
                .replace_by_key(
                    "products",
                    id,
                    &json!({"product_id": id, "name": name, "brand": "LG"}),
                    true,
                )
                .await
                .unwrap();
        }
        store
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failures_are_counted_and_batch_metadata_written() {
        let store = seeded().await;
        let report = enrich_products(&store, &FakeClient, "products", &config(), None)
            .await
            .unwrap();

        assert_eq!(report.total_products, 3);
        assert_eq!(report.successful_embeddings, 2);
        assert_eq!(report.failed_embeddings, 1);

        let emb = store
            .find_by_key("product_embeddings", "emb_a_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(emb["embedding_dimension"], 3);
        assert_eq!(emb["embedding_model"], "fake-model");
        assert_eq!(emb["embedding_text"], "TV one LG televisor");

        let meta = store
            .find_by_key("embedding_metadata", &report.batch_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta["failed_embeddings"], 1);
        assert!(meta["success_rate"].as_f64().unwrap() > 66.0);
    }

    #[tokio::test]
    async fn limit_caps_the_batch() {
        let store = seeded().await;
        let report = enrich_products(&store, &FakeClient, "products", &config(), Some(1))
            .await
            .unwrap();
        assert_eq!(report.total_products, 1);
        assert_eq!(
            store
                .count("product_embeddings", &Filter::all())
                .await
                .unwrap(),
            1
        );
    }

    #[test]
    fn success_rate_handles_empty_batches() {
        let now = Utc::now();
        let report = EnrichReport {
            batch_id: "b".into(),
            total_products: 0,
            successful_embeddings: 0,
            failed_embeddings: 0,
            start_time: now,
            end_time: now,
            duration_seconds: 0.0,
            model: "m".into(),
        };
        assert_eq!(report.success_rate(), 0.0);
    }
}
