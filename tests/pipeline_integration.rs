//! Drives the orchestrator through the public library API with an in-memory
//! store and a scripted process executor.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use product_harvest::config::{
    AdminConfig, Config, DbConfig, EmbeddingConfig, LoggingConfig, PipelineConfig, SourceConfig,
};
use product_harvest::models::{ProductDocument, SourceStatus};
use product_harvest::pipeline::Orchestrator;
use product_harvest::runner::{ProcessError, ProcessExecutor, ProcessOutput};
use product_harvest::store::memory::InMemoryStore;
use product_harvest::store::{DocumentStore, Filter};
use tempfile::TempDir;

/// What a scripted source does when invoked.
#[derive(Clone)]
enum Behaviour {
    /// Write `body` to `file` in the working directory, exit 0.
    Write { file: &'static str, body: String },
    Exit(i32),
    Hang,
}

struct ScriptedExecutor {
    behaviours: BTreeMap<String, Behaviour>,
    invocations: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedExecutor {
    fn new(behaviours: &[(&str, Behaviour)]) -> Self {
        Self {
            behaviours: behaviours
                .iter()
                .map(|(name, b)| (name.to_string(), b.clone()))
                .collect(),
            invocations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        self.invocations
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        match self.behaviours.get(program) {
            Some(Behaviour::Write { file, body }) => {
                std::fs::write(cwd.join(file), body).unwrap();
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                })
            }
            Some(Behaviour::Exit(code)) => Ok(ProcessOutput {
                exit_code: Some(*code),
                ..Default::default()
            }),
            Some(Behaviour::Hang) => Err(ProcessError::TimedOut(timeout)),
            None => Err(ProcessError::Spawn {
                program: program.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

/// Every source `<name>` runs program `<name>` with `--paginas {paginas}`.
fn config(tmp: &TempDir, names: &[&str]) -> Config {
    let sources = names
        .iter()
        .map(|name| {
            let cwd = tmp.path().join("sources").join(name);
            std::fs::create_dir_all(&cwd).unwrap();
            (
                name.to_string(),
                SourceConfig {
                    cwd,
                    command: vec![name.to_string()],
                    args: vec!["--paginas".into(), "{paginas}".into()],
                    patterns: Vec::new(),
                    timeout_secs: None,
                },
            )
        })
        .collect();

    Config {
        db: DbConfig {
            path: tmp.path().join("harvest.sqlite"),
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
        sources,
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn one_source_succeeds_and_one_fails() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, &["A", "B"]);
    let executor = Arc::new(ScriptedExecutor::new(&[
        (
            "A",
            Behaviour::Write {
                file: "a.json",
                body: r#"[{"titulo": "one", "fuente": "A", "contador_extraccion": 1},
                          {"titulo": "two", "fuente": "A", "contador_extraccion": 2}]"#
                    .into(),
            },
        ),
        ("B", Behaviour::Exit(1)),
    ]));
    let store = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(&cfg, store.clone(), executor.clone());
    let summary = orchestrator.run_pipeline(&names(&["A", "B"]), 1).await;

    assert_eq!(summary.sources_succeeded, 1);
    assert_eq!(summary.records_processed, 2);
    assert_eq!(summary.errors, vec!["Falló scraper B".to_string()]);
    assert_eq!(summary.sources_attempted, names(&["A", "B"]));
    assert!(summary.anything_accomplished());

    let invocations = executor.invocations.lock().unwrap();
    assert_eq!(invocations[0].1, vec!["--paginas", "1"]);
    assert_eq!(invocations.len(), 2);
}

#[tokio::test]
async fn same_record_in_two_runs_keeps_created_at() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, &["x"]);
    let executor = Arc::new(ScriptedExecutor::new(&[(
        "x",
        Behaviour::Write {
            file: "productos.json",
            body: r#"[{"fuente": "x", "contador_extraccion": 7, "precio_valor": 100}]"#.into(),
        },
    )]));
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::new(&cfg, store.clone(), executor);

    let first_run = orchestrator.run_pipeline(&names(&["x"]), 1).await;
    let first: ProductDocument =
        serde_json::from_value(store.find_by_key("products", "x_7").await.unwrap().unwrap())
            .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second_run = orchestrator.run_pipeline(&names(&["x"]), 1).await;
    let second: ProductDocument =
        serde_json::from_value(store.find_by_key("products", "x_7").await.unwrap().unwrap())
            .unwrap();

    assert_eq!(first_run.sources[0].inserted, 1);
    assert_eq!(second_run.sources[0].unchanged, 1);
    assert_eq!(second.price, 100.0);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
    assert_eq!(store.count("products", &Filter::all()).await.unwrap(), 1);
    assert_eq!(store.count("pipeline_runs", &Filter::all()).await.unwrap(), 2);
}

#[tokio::test]
async fn partial_artifacts_are_counted_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp, &["lines", "slow", "after"]);
    let executor = Arc::new(ScriptedExecutor::new(&[
        (
            "lines",
            Behaviour::Write {
                file: "productos.jsonl",
                body: "{\"fuente\": \"lines\", \"contador_extraccion\": 1}\n\
                       {oops\n\
                       \"just a string\"\n\
                       {\"fuente\": \"lines\", \"contador_extraccion\": 2}\n"
                    .into(),
            },
        ),
        ("slow", Behaviour::Hang),
        (
            "after",
            Behaviour::Write {
                file: "products_after.json",
                body: r#"[{"fuente": "after", "contador_extraccion": 1}, null]"#.into(),
            },
        ),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::new(&cfg, store.clone(), executor);

    let summary = orchestrator
        .run_pipeline(&names(&["lines", "slow", "after"]), 2)
        .await;

    assert_eq!(summary.sources_succeeded, 2);
    assert_eq!(summary.sources_failed, 1);
    assert_eq!(summary.records_processed, 3);
    assert_eq!(summary.sources[1].status, SourceStatus::TimedOut);
    assert_eq!(summary.sources[0].errors, 2);
    assert_eq!(summary.sources[0].inserted, 2);
    assert_eq!(summary.sources[2].errors, 1);
    assert_eq!(summary.errors.len(), 3);
    assert!(summary.errors[0].starts_with("Scraper lines: 2 líneas inválidas"));
    assert_eq!(summary.errors[1], "Falló scraper slow (timeout 600s)");
    assert_eq!(summary.errors[2], "Scraper after: 1 productos no se pudieron guardar");
}
