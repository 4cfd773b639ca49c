//! Multi-source pipeline orchestration.
//!
//! `harvest run` drives every requested source through the same sequence:
//!
//! ```text
//! SourceRunner ──▶ artifact::read_records ──▶ ProductRepository::upsert_batch
//!      │                    │                            │
//!      └──── failures, counts and timings ───────────────┴──▶ RunSummary
//! ```
//!
//! Sources run one at a time in the order given. A failing source adds an
//! entry to the summary's `errores` and the run moves on; only an
//! unreachable store at startup aborts the invocation.
//!
//! The finished [`RunSummary`] is written to
//! `<output_dir>/ejecucion_<YYYYmmdd_HHMMSS>.json` (with a `_<n>` suffix if
//! that name is taken), stored in the runs collection and printed to stdout.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use harvest_core::models::{RunSummary, SourceReport, SourceStatus};
use harvest_core::store::DocumentStore;
use tracing::{error, info, info_span, warn, Instrument};

use crate::artifact;
use crate::config::{Config, SourceConfig};
use crate::persistence::{self, ProductRepository};
use crate::runner::{ProcessExecutor, SourceRunner, TokioProcessExecutor};

pub struct Orchestrator {
    sources: BTreeMap<String, SourceConfig>,
    runner: SourceRunner,
    products: ProductRepository,
    store: Arc<dyn DocumentStore>,
    runs_collection: String,
    output_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Self {
        let runner = SourceRunner::new(
            executor,
            Duration::from_secs(config.pipeline.timeout_secs),
        )
        .fresh_artifacts_only(config.pipeline.fresh_artifacts_only);

        Self {
            sources: config.sources.clone(),
            runner,
            products: ProductRepository::new(store.clone(), &config.db.products_collection),
            store,
            runs_collection: config.db.runs_collection.clone(),
            output_dir: config.pipeline.output_dir.clone(),
        }
    }

    /// Run `sources` in order and return the finished summary.
    ///
    /// The summary is persisted before returning; persistence failures are
    /// logged but do not change the result.
    pub async fn run_pipeline(&self, sources: &[String], pages: u32) -> RunSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);

        async {
            let started_at = Utc::now();
            let clock = Instant::now();
            info!(sources = ?sources, pages, "Pipeline started");

            let mut summary = RunSummary::new(run_id.clone(), started_at, sources.to_vec(), pages);

            for name in sources {
                let report = self
                    .run_source(name, pages, &mut summary)
                    .instrument(info_span!("source", source = %name))
                    .await;
                if report.status.is_success() {
                    summary.sources_succeeded += 1;
                } else {
                    summary.sources_failed += 1;
                }
                summary.sources.push(report);
            }

            summary.finished_at = Utc::now();
            summary.duration_secs = clock.elapsed().as_secs_f64();

            info!(
                succeeded = summary.sources_succeeded,
                failed = summary.sources_failed,
                records = summary.records_processed,
                errors = summary.errors.len(),
                "Pipeline finished"
            );

            if let Err(e) = self.persist_summary(&summary).await {
                error!(error = %format!("{:#}", e), "Failed to persist run summary");
            }
            summary
        }
        .instrument(span)
        .await
    }

    async fn run_source(&self, name: &str, pages: u32, summary: &mut RunSummary) -> SourceReport {
        let clock = Instant::now();
        let mut report = SourceReport::new(name);

        let Some(config) = self.sources.get(name) else {
            warn!("Source is not configured");
            report.status = SourceStatus::Failed;
            summary
                .errors
                .push(format!("Falló scraper {} (no configurado)", name));
            return report;
        };

        report.status = SourceStatus::Running;
        let result = self
            .runner
            .run(name, config, pages)
            .instrument(info_span!("stage", stage = "execute"))
            .await;
        report.status = result.status;

        match result.status {
            SourceStatus::Succeeded => {}
            SourceStatus::TimedOut => {
                summary.errors.push(format!(
                    "Falló scraper {} (timeout {}s)",
                    name,
                    self.runner.timeout_for(config).as_secs()
                ));
                report.duration_secs = clock.elapsed().as_secs_f64();
                return report;
            }
            _ => {
                if let Some(reason) = &result.error {
                    warn!(reason = %reason, "Source failed");
                }
                summary.errors.push(format!("Falló scraper {}", name));
                report.duration_secs = clock.elapsed().as_secs_f64();
                return report;
            }
        }

        let Some(path) = result.artifact_path else {
            summary
                .errors
                .push(format!("Scraper {} sin archivo de salida", name));
            report.duration_secs = clock.elapsed().as_secs_f64();
            return report;
        };
        let artifact_name = path.display().to_string();
        summary.artifacts.push(artifact_name.clone());
        report.artifact = Some(artifact_name.clone());

        let read = info_span!("stage", stage = "read").in_scope(|| artifact::read_records(&path));
        let parsed = match read {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Artifact could not be read");
                summary
                    .errors
                    .push(format!("Error leyendo archivo de {}: {}", name, e));
                report.duration_secs = clock.elapsed().as_secs_f64();
                return report;
            }
        };

        if !parsed.line_errors.is_empty() {
            for line_error in &parsed.line_errors {
                warn!(line = line_error.line, error = %line_error.message, "Skipping invalid line");
            }
            summary.errors.push(format!(
                "Scraper {}: {} líneas inválidas en {}",
                name,
                parsed.line_errors.len(),
                artifact_name
            ));
        }
        report.records_read = parsed.records.len();

        let stats = self
            .products
            .upsert_batch(&parsed.records)
            .instrument(info_span!("stage", stage = "persist"))
            .await;
        report.inserted = stats.inserted;
        report.updated = stats.updated;
        report.unchanged = stats.unchanged;
        report.errors = stats.errors + parsed.line_errors.len() as u64;
        summary.records_processed += stats.succeeded();

        if stats.errors > 0 {
            summary.errors.push(format!(
                "Scraper {}: {} productos no se pudieron guardar",
                name, stats.errors
            ));
        }

        report.duration_secs = clock.elapsed().as_secs_f64();
        info!(
            records = report.records_read,
            stored = stats.succeeded(),
            duration_secs = report.duration_secs,
            "Source processed"
        );
        report
    }

    async fn persist_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = write_summary_file(&self.output_dir, summary)?;
        info!(path = %path.display(), "Run summary written");

        let body = serde_json::to_value(summary)?;
        self.store
            .replace_by_key(&self.runs_collection, &summary.run_id, &body, true)
            .await
            .context("Failed to store run summary")?;
        Ok(path)
    }
}

/// Write `summary` as pretty JSON into `dir`, returning the file path.
///
/// An existing file is never replaced: when `ejecucion_<ts>.json` is taken
/// the name gets a `_<n>` suffix.
pub fn write_summary_file(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let stem = format!("ejecucion_{}", summary.started_at.format("%Y%m%d_%H%M%S"));
    let json = serde_json::to_string_pretty(summary)?;

    let mut attempt = 0u32;
    loop {
        let path = if attempt == 0 {
            dir.join(format!("{}.json", stem))
        } else {
            dir.join(format!("{}_{}.json", stem, attempt))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(json.as_bytes())
                    .with_context(|| format!("Failed to write run summary: {}", path.display()))?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create run summary: {}", path.display()))
            }
        }
    }
}

/// Parse `--sources a,b`; without a list every configured source runs.
pub fn select_sources(config: &Config, requested: Option<&str>) -> Vec<String> {
    match requested {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => config.sources.keys().cloned().collect(),
    }
}

/// Entry point for `harvest run`.
pub async fn run_harvest(
    config: &Config,
    sources: Option<&str>,
    pages: Option<u32>,
) -> Result<RunSummary> {
    let selected = select_sources(config, sources);
    if selected.is_empty() {
        anyhow::bail!("No sources to run. Add [sources.<name>] tables to the config.");
    }
    let pages = pages.unwrap_or(config.pipeline.default_pages).max(1);

    let store = persistence::connect(&config.db)
        .await
        .context("Cannot start pipeline without a document store")?;

    let orchestrator = Orchestrator::new(config, store, Arc::new(TokioProcessExecutor));
    let summary = orchestrator.run_pipeline(&selected, pages).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, DbConfig, EmbeddingConfig, LoggingConfig, PipelineConfig};
    use crate::runner::{ProcessError, ProcessOutput};
    use async_trait::async_trait;
    use harvest_core::store::memory::InMemoryStore;
    use harvest_core::store::Filter;
    use tempfile::TempDir;

    /// Executor whose behaviour is chosen by the program name.
    struct ScriptedExecutor;

    #[async_trait]
    impl ProcessExecutor for ScriptedExecutor {
        async fn run(
            &self,
            program: &str,
            _args: &[String],
            cwd: &Path,
            timeout: Duration,
        ) -> Result<ProcessOutput, ProcessError> {
            match program {
                "write-two" => {
                    std::fs::write(
                        cwd.join("productos.json"),
                        r#"[{"fuente":"a","contador_extraccion":1},{"fuente":"a","contador_extraccion":2}]"#,
                    )
                    .unwrap();
                    Ok(ProcessOutput {
                        exit_code: Some(0),
                        ..Default::default()
                    })
                }
                "write-nothing" => Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                }),
                "hang" => Err(ProcessError::TimedOut(timeout)),
                _ => Ok(ProcessOutput {
                    exit_code: Some(1),
                    ..Default::default()
                }),
            }
        }
    }

    fn config(tmp: &TempDir, sources: &[(&str, &str)]) -> Config {
        let mut map = BTreeMap::new();
        for (name, program) in sources {
            let cwd = tmp.path().join(name);
            std::fs::create_dir_all(&cwd).unwrap();
            map.insert(
                name.to_string(),
                SourceConfig {
                    cwd,
                    command: vec![program.to_string()],
                    args: Vec::new(),
                    patterns: Vec::new(),
                    timeout_secs: None,
                },
            );
        }
        Config {
            db: DbConfig {
                path: tmp.path().join("unused.sqlite"),
                products_collection: "products".into(),
                runs_collection: "pipeline_runs".into(),
            },
            pipeline: PipelineConfig {
                output_dir: tmp.path().join("scraped_output"),
                ..Default::default()
            },
            logging: LoggingConfig::default(),
            embedding: EmbeddingConfig::default(),
            admin: AdminConfig::default(),
            sources: map,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_next_one() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, &[("a", "write-two"), ("b", "fail")]);
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(&cfg, store.clone(), Arc::new(ScriptedExecutor));

        let summary = orchestrator.run_pipeline(&names(&["b", "a"]), 1).await;

        assert_eq!(summary.sources_succeeded, 1);
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.errors, vec!["Falló scraper b".to_string()]);
        assert_eq!(summary.sources[0].source, "b");
        assert_eq!(summary.sources[1].inserted, 2);
        assert_eq!(store.count("products", &Filter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn summary_is_written_to_file_and_store() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, &[("a", "write-two")]);
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(&cfg, store.clone(), Arc::new(ScriptedExecutor));

        let summary = orchestrator.run_pipeline(&names(&["a"]), 2).await;

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("scraped_output"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("ejecucion_"));

        let stored = store
            .find_by_key("pipeline_runs", &summary.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["paginas"], 2);
        assert_eq!(stored["scrapers_ejecutados"], 1);
    }

    #[tokio::test]
    async fn back_to_back_runs_keep_separate_summaries() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, &[("a", "write-two")]);
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(&cfg, store, Arc::new(ScriptedExecutor));

        let first = orchestrator.run_pipeline(&names(&["a"]), 1).await;
        let second = orchestrator.run_pipeline(&names(&["a"]), 1).await;
        assert_ne!(first.run_id, second.run_id);

        let mut run_ids: Vec<String> = std::fs::read_dir(tmp.path().join("scraped_output"))
            .unwrap()
            .map(|e| {
                let body = std::fs::read_to_string(e.unwrap().path()).unwrap();
                let value: serde_json::Value = serde_json::from_str(&body).unwrap();
                value["run_id"].as_str().unwrap().to_string()
            })
            .collect();
        run_ids.sort();
        let mut expected = vec![first.run_id, second.run_id];
        expected.sort();
        assert_eq!(run_ids, expected);
    }

    #[test]
    fn summary_file_name_collision_gets_suffix() {
        let tmp = TempDir::new().unwrap();
        let summary = RunSummary::new("r1".into(), Utc::now(), names(&["a"]), 1);

        let first = write_summary_file(tmp.path(), &summary).unwrap();
        let second = write_summary_file(tmp.path(), &summary).unwrap();

        assert_ne!(first, second);
        let name = second.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("ejecucion_") && name.ends_with("_1.json"));
        assert!(first.exists());
    }

    #[tokio::test]
    async fn missing_artifact_timeout_and_unknown_sources_are_reported() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, &[("quiet", "write-nothing"), ("slow", "hang")]);
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(&cfg, store, Arc::new(ScriptedExecutor));

        let summary = orchestrator
            .run_pipeline(&names(&["quiet", "slow", "ghost"]), 1)
            .await;

        assert_eq!(summary.sources_succeeded, 1);
        assert_eq!(summary.sources_failed, 2);
        assert_eq!(
            summary.errors,
            vec![
                "Scraper quiet sin archivo de salida".to_string(),
                "Falló scraper slow (timeout 600s)".to_string(),
                "Falló scraper ghost (no configurado)".to_string(),
            ]
        );
        assert_eq!(summary.sources[1].status, SourceStatus::TimedOut);
        assert!(summary.anything_accomplished());
    }

    #[test]
    fn source_selection() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, &[("b", "x"), ("a", "x")]);
        assert_eq!(select_sources(&cfg, None), names(&["a", "b"]));
        assert_eq!(select_sources(&cfg, Some(" b, ,a")), names(&["b", "a"]));
    }
}
