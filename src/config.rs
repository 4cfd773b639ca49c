//! TOML configuration parsing and validation.
//!
//! The whole tool is driven by one file (default `./config/harvest.toml`).
//! Every section except `[db]` has defaults, so a minimal config only needs
//! a database path and at least one `[sources.<name>]` table to be useful.
//!
//! ```toml
//! [db]
//! path = "./data/harvest.sqlite"
//!
//! [sources.alkosto]
//! cwd = "scrapers/alkosto"
//! command = ["python", "-m", "alkosto_scraper.main", "scrape"]
//! args = ["--categoria", "televisores", "--paginas", "{paginas}"]
//! ```
//!
//! Relative paths (`db.path`, `pipeline.output_dir`, `logging.dir`,
//! `admin.backup_dir`, `sources.*.cwd`) are resolved against the directory
//! containing the config file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_products_collection")]
    pub products_collection: String,
    #[serde(default = "default_runs_collection")]
    pub runs_collection: String,
}

fn default_products_collection() -> String {
    "products".to_string()
}
fn default_runs_collection() -> String {
    "pipeline_runs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pages")]
    pub default_pages: u32,
    #[serde(default)]
    pub fresh_artifacts_only: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            timeout_secs: default_timeout_secs(),
            default_pages: default_pages(),
            fresh_artifacts_only: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("scraped_output")
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_pages() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for the daily rolling log file; console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between consecutive embedding calls.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_embeddings_collection")]
    pub collection: String,
    #[serde(default = "default_metadata_collection")]
    pub metadata_collection: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout_secs(),
            delay_ms: default_delay_ms(),
            collection: default_embeddings_collection(),
            metadata_collection: default_metadata_collection(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "bge-m3:latest".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_delay_ms() -> u64 {
    500
}
fn default_embeddings_collection() -> String {
    "product_embeddings".to_string()
}
fn default_metadata_collection() -> String {
    "embedding_metadata".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

/// One external extraction process.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Working directory the process runs in and writes its artifact to.
    pub cwd: PathBuf,
    /// Program followed by its fixed leading arguments.
    pub command: Vec<String>,
    /// Argument template; `{paginas}` and `{pages}` become the page count.
    #[serde(default)]
    pub args: Vec<String>,
    /// Artifact glob patterns relative to `cwd`; defaults apply when empty.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Per-source override of `pipeline.timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Resolve relative paths against `base` (the config file's directory).
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.db.path);
        resolve(&mut self.pipeline.output_dir);
        resolve(&mut self.admin.backup_dir);
        if let Some(dir) = self.logging.dir.as_mut() {
            resolve(dir);
        }
        for source in self.sources.values_mut() {
            resolve(&mut source.cwd);
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.pipeline.timeout_secs == 0 {
        bail!("pipeline.timeout_secs must be > 0");
    }
    if config.pipeline.default_pages == 0 {
        bail!("pipeline.default_pages must be > 0");
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "warning" | "error" => {}
        other => bail!(
            "Unknown logging.level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    for (name, source) in &config.sources {
        if source.command.first().map_or(true, |p| p.trim().is_empty()) {
            bail!("sources.{}.command must name a program", name);
        }
        if source.timeout_secs == Some(0) {
            bail!("sources.{}.timeout_secs must be > 0", name);
        }
    }

    Ok(())
}
