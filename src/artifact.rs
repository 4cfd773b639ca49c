//! Reading records out of a source artifact.
//!
//! Sources are not consistent about their output format, so the reader
//! accepts three shapes:
//!
//! | Content | Result |
//! |---------|--------|
//! | empty or whitespace | no records |
//! | starts with `[` | one JSON array, every element a record |
//! | a single JSON object | exactly one record |
//! | anything else | JSON-Lines, one record per non-blank line |
//!
//! Bad JSON-Lines entries are collected in [`ArtifactRecords::line_errors`]
//! instead of failing the whole file. The file only fails when no line parses.

use std::path::{Path, PathBuf};

use harvest_core::models::RawRecord;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("artifact {path} is not valid JSON, JSON-Lines or array: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A recoverable problem with one JSON-Lines entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ArtifactRecords {
    pub records: Vec<RawRecord>,
    pub line_errors: Vec<LineError>,
}

pub fn read_records(path: &Path) -> Result<ArtifactRecords, ArtifactError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ArtifactError::NotFound(path.to_path_buf()),
        _ => ArtifactError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    parse_records(&content).map_err(|reason| ArtifactError::Format {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse artifact content. The error is a human-readable reason.
pub fn parse_records(content: &str) -> Result<ArtifactRecords, String> {
    let content = content.trim_start_matches('\u{feff}');
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(ArtifactRecords::default());
    }

    if trimmed.starts_with('[') {
        let items: Vec<Value> =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {}", e))?;
        return Ok(ArtifactRecords {
            records: items.into_iter().map(RawRecord::new).collect(),
            line_errors: Vec::new(),
        });
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Object(_) => Ok(ArtifactRecords {
                records: vec![RawRecord::new(value)],
                line_errors: Vec::new(),
            }),
            other => Err(format!(
                "top-level JSON value is a {}, expected an object or array",
                RawRecord::new(other).kind()
            )),
        };
    }

    // line numbers refer to the file, so leading blank lines still count
    parse_json_lines(content)
}

fn parse_json_lines(content: &str) -> Result<ArtifactRecords, String> {
    let mut out = ArtifactRecords::default();
    let mut seen = 0usize;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        seen += 1;
        match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => out.records.push(RawRecord::new(value)),
            Ok(other) => out.line_errors.push(LineError {
                line: index + 1,
                message: format!("expected an object, found {}", RawRecord::new(other).kind()),
            }),
            Err(e) => out.line_errors.push(LineError {
                line: index + 1,
                message: e.to_string(),
            }),
        }
    }

    if seen > 0 && out.records.is_empty() {
        return Err(format!("none of {} lines parsed as a JSON object", seen));
    }
    Ok(out)
}
