//! Record identity and content fingerprint.
//!
//! Two independent keys are derived from every raw record:
//!
//! - **Identity**: `"{source}_{counter}"`. Used as the store's primary key,
//!   so re-ingesting the same `(source, counter)` pair replaces the stored
//!   document instead of duplicating it.
//! - **Fingerprint**: SHA-256 over the normalized title, brand and source
//!   plus the numeric price. Detects real content drift even when the
//!   identity parameters change.
//!
//! Neither function can fail: missing fields contribute empty segments.
//!
//! # Example
//!
//! ```rust
//! use harvest_core::identity::compute_identity;
//!
//! assert_eq!(compute_identity("exito", "42").as_str(), "exito_42");
//! // An absent counter still yields a deterministic key.
//! assert_eq!(compute_identity("exito", "").as_str(), "exito_");
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{format_number, Field, RawRecord};

/// Source name used in the identity when a record does not name its source.
pub const UNKNOWN_SOURCE: &str = "unknown";

const FINGERPRINT_SEPARATOR: &str = "|";

/// Deterministic primary key of a product document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 digest of a record's normalized content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the identity from a source name and its per-source counter.
pub fn compute_identity(source_name: &str, source_counter: &str) -> Identity {
    Identity(format!("{}_{}", source_name, source_counter))
}

/// Identity of a raw record.
///
/// A record without a source name is filed under [`UNKNOWN_SOURCE`]; a
/// record without a counter produces the degenerate `"{source}_"` key.
pub fn record_identity(record: &RawRecord) -> Identity {
    let source = record.text(Field::Source);
    let source = if source.is_empty() {
        UNKNOWN_SOURCE.to_string()
    } else {
        source
    };
    compute_identity(&source, &record.text(Field::Counter))
}

/// Content fingerprint of a raw record.
///
/// Title, brand and source are trimmed and lower-cased, then joined in that
/// order with the numeric price using `|`. The price is rendered the same
/// way numbers are rendered everywhere else (`100.0` → `"100"`).
pub fn compute_fingerprint(record: &RawRecord) -> Fingerprint {
    let segments = [
        normalize(&record.text(Field::Title)),
        normalize(&record.text(Field::Brand)),
        normalize(&record.text(Field::Source)),
        format_number(record.price_value()),
    ];

    let mut hasher = Sha256::new();
    hasher.update(segments.join(FINGERPRINT_SEPARATOR).as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
