//! Running one external source process and locating its artifact.
//!
//! A source moves through `Pending → Running → {Succeeded, Failed, TimedOut}`.
//! [`SourceRunner::run`] never returns an error: every failure mode (missing
//! working directory, missing executable, non-zero exit, timeout) becomes a
//! [`RunResult`] with a terminal status and a message.
//!
//! The process boundary is the [`ProcessExecutor`] trait. Production code
//! uses [`TokioProcessExecutor`]; tests substitute a fake.
//!
//! # Artifact discovery
//!
//! After a successful exit the working directory is globbed with the
//! source's patterns (case-insensitive) and the most recently modified match
//! wins. With no configured patterns the defaults are:
//!
//! ```text
//! productos*.json  products*.json  <source>*.json  data/productos*.json  output/*.json
//! ```
//!
//! plus the same patterns with a `.jsonl` extension.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use harvest_core::models::SourceStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SourceConfig;

/// Deepest directory level searched for artifacts, relative to `cwd`.
const ARTIFACT_SEARCH_DEPTH: usize = 3;
const LOG_TAIL_CHARS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("failed while waiting for process: {0}")]
    Wait(std::io::Error),
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `program` with `args` in `cwd`, killing it once `timeout` elapses.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns real child processes with `tokio::process`.
pub struct TokioProcessExecutor;

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProcessError::Wait(e)),
            Err(_) => return Err(ProcessError::TimedOut(timeout)),
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Terminal outcome of one source invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub status: SourceStatus,
    pub artifact_path: Option<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl RunResult {
    fn failed(status: SourceStatus, error: String) -> Self {
        Self {
            status,
            artifact_path: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
        }
    }
}

pub struct SourceRunner {
    executor: Arc<dyn ProcessExecutor>,
    default_timeout: Duration,
    fresh_artifacts_only: bool,
}

impl SourceRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, default_timeout: Duration) -> Self {
        Self {
            executor,
            default_timeout,
            fresh_artifacts_only: false,
        }
    }

    /// Ignore artifacts last modified before the invocation started.
    pub fn fresh_artifacts_only(mut self, fresh: bool) -> Self {
        self.fresh_artifacts_only = fresh;
        self
    }

    pub fn timeout_for(&self, source: &SourceConfig) -> Duration {
        source
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    pub async fn run(&self, name: &str, source: &SourceConfig, pages: u32) -> RunResult {
        let Some((program, args)) = build_invocation(source, pages) else {
            return RunResult::failed(SourceStatus::Failed, "no command configured".to_string());
        };

        if !source.cwd.is_dir() {
            return RunResult::failed(
                SourceStatus::Failed,
                format!("working directory does not exist: {}", source.cwd.display()),
            );
        }

        let timeout = self.timeout_for(source);
        let started = SystemTime::now();
        info!(
            source = name,
            program = %program,
            cwd = %source.cwd.display(),
            timeout_secs = timeout.as_secs(),
            "Starting source"
        );

        let output = match self
            .executor
            .run(&program, &args, &source.cwd, timeout)
            .await
        {
            Ok(output) => output,
            Err(e @ ProcessError::TimedOut(_)) => {
                warn!(source = name, timeout_secs = timeout.as_secs(), "Source timed out");
                return RunResult::failed(SourceStatus::TimedOut, e.to_string());
            }
            Err(e) => {
                warn!(source = name, error = %e, "Source could not be run");
                return RunResult::failed(SourceStatus::Failed, e.to_string());
            }
        };

        if !output.success() {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            warn!(
                source = name,
                exit_code = %code,
                stderr = %tail(&output.stderr, LOG_TAIL_CHARS),
                "Source exited with failure"
            );
            return RunResult {
                status: SourceStatus::Failed,
                artifact_path: None,
                error: Some(format!("exit status {}", code)),
                stdout: output.stdout,
                stderr: output.stderr,
            };
        }

        debug!(source = name, stdout = %tail(&output.stdout, LOG_TAIL_CHARS), "Source output");

        let patterns = if source.patterns.is_empty() {
            default_patterns(name)
        } else {
            source.patterns.clone()
        };
        let since = self.fresh_artifacts_only.then_some(started);
        let artifact_path = find_artifact(&source.cwd, &patterns, since);
        match &artifact_path {
            Some(path) => info!(source = name, artifact = %path.display(), "Source succeeded"),
            None => warn!(source = name, "Source succeeded without an artifact"),
        }

        RunResult {
            status: SourceStatus::Succeeded,
            artifact_path,
            stdout: output.stdout,
            stderr: output.stderr,
            error: None,
        }
    }
}

/// Program and arguments with the page count substituted.
pub fn build_invocation(source: &SourceConfig, pages: u32) -> Option<(String, Vec<String>)> {
    let (program, fixed) = source.command.split_first()?;
    let pages = pages.to_string();
    let args = fixed
        .iter()
        .cloned()
        .chain(
            source
                .args
                .iter()
                .map(|arg| arg.replace("{paginas}", &pages).replace("{pages}", &pages)),
        )
        .collect();
    Some((program.clone(), args))
}

pub fn default_patterns(source_name: &str) -> Vec<String> {
    let stems = [
        "productos*".to_string(),
        "products*".to_string(),
        format!("{}*", source_name),
        "data/productos*".to_string(),
        "output/*".to_string(),
    ];
    ["json", "jsonl"]
        .iter()
        .flat_map(|ext| stems.iter().map(move |stem| format!("{}.{}", stem, ext)))
        .collect()
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
        {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "Ignoring invalid artifact pattern"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Most recently modified file under `cwd` matching any pattern.
pub fn find_artifact(cwd: &Path, patterns: &[String], since: Option<SystemTime>) -> Option<PathBuf> {
    let globs = build_globset(patterns);

    WalkDir::new(cwd)
        .max_depth(ARTIFACT_SEARCH_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(cwd)
                .is_ok_and(|relative| globs.is_match(relative))
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.into_path()))
        })
        .filter(|(modified, _)| since.map_or(true, |since| *modified >= since))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    let start = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &s[start..]
}
