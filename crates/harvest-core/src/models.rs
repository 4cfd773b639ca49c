//! Core data models used throughout product-harvest.
//!
//! [`RawRecord`] is what a source writes into its artifact: an untyped JSON
//! mapping in which no field is guaranteed. All "missing or oddly typed
//! field" handling lives in its accessors so the rest of the pipeline only
//! ever sees defaulted, typed values.
//!
//! [`ProductDocument`] is the normalized form persisted in the store and
//! [`RunSummary`] is the immutable record of one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::identity::{compute_fingerprint, record_identity};

/// Semantic fields a source may emit, each with its accepted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Brand,
    Category,
    PriceText,
    Price,
    Currency,
    Size,
    Rating,
    Details,
    Page,
    ExtractionDate,
    ExtractionStatus,
    Source,
    Counter,
    CounterTotal,
    ImageUrl,
    ProductUrl,
}

impl Field {
    /// Keys looked up for this field, in priority order.
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            Field::Title => &["titulo", "title", "name"],
            Field::Brand => &["marca", "brand"],
            Field::Category => &["categoria", "category"],
            Field::PriceText => &["precio_texto", "precio", "price_text"],
            Field::Price => &["precio_valor", "price_valor", "price_value", "price"],
            Field::Currency => &["moneda", "currency"],
            Field::Size => &["tamaño", "tamano", "size"],
            Field::Rating => &["calificacion", "rating"],
            Field::Details => &["detalles_adicionales", "details"],
            Field::Page => &["pagina", "page"],
            Field::ExtractionDate => &["fecha_extraccion", "extraction_date"],
            Field::ExtractionStatus => &["extraction_status"],
            Field::Source => &["fuente", "source"],
            Field::Counter => &["contador_extraccion", "counter"],
            Field::CounterTotal => &["contador_extraccion_total"],
            Field::ImageUrl => &["imagen", "image_url"],
            Field::ProductUrl => &["link", "product_url"],
        }
    }
}

/// A record exactly as a source produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Value);

impl RawRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// JSON type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        json_kind(&self.0)
    }

    /// First non-null value among the field's accepted keys.
    pub fn get(&self, field: Field) -> Option<&Value> {
        let obj = self.0.as_object()?;
        field
            .keys()
            .iter()
            .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
    }

    /// Field rendered as text; numbers and booleans are stringified,
    /// anything else (missing, arrays, objects) is the empty string.
    pub fn text(&self, field: Field) -> String {
        match self.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => format_json_number(n),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Field as a finite float, accepting numeric strings.
    pub fn number(&self, field: Field) -> Option<f64> {
        let n = match self.get(field)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Field as an integer, accepting whole floats and numeric strings.
    pub fn integer(&self, field: Field) -> Option<i64> {
        match self.get(field)? {
            Value::Number(n) => n.as_i64().or_else(|| whole(n.as_f64()?)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| whole(s.parse::<f64>().ok()?))
            }
            _ => None,
        }
    }

    /// Numeric price: the explicit numeric field when it parses, otherwise
    /// the display text run through [`parse_price`].
    pub fn price_value(&self) -> f64 {
        if let Some(value) = self.number(Field::Price) {
            return value;
        }
        let explicit = self.text(Field::Price);
        if !explicit.is_empty() {
            return parse_price(&explicit);
        }
        parse_price(&self.text(Field::PriceText))
    }

    /// Rating as a float; `"N/A"` and unparsable values become `0.0`.
    pub fn rating(&self) -> f64 {
        self.number(Field::Rating)
            .unwrap_or_else(|| parse_rating(&self.text(Field::Rating)))
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn whole(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn format_json_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        format_number(n.as_f64().unwrap_or(0.0))
    }
}

/// Render a float without a trailing `.0` for whole values (`100.0` → `"100"`).
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Extract a numeric price from display text such as `"COP 2,599,000"` or
/// `"$ 1.299.000"`.
///
/// Currency markers, thousands separators (`.` and `,`) and whitespace are
/// removed before parsing. Returns `0.0` when nothing numeric remains.
pub fn parse_price(text: &str) -> f64 {
    let cleaned: String = text
        .replace("COP", "")
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '.') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse a rating display value; empty, `"N/A"` or garbage yields `0.0`.
pub fn parse_rating(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("n/a") {
        return 0.0;
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Normalized product document as stored in the `products` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub product_id: String,
    pub product_hash: String,
    pub counter: i64,
    pub counter_total: i64,
    pub name: String,
    pub brand: String,
    pub category: String,
    pub price_text: String,
    pub price: f64,
    pub currency: String,
    pub size: String,
    pub rating: f64,
    pub additional_details: String,
    pub source: String,
    pub image_url: String,
    pub product_link: String,
    pub page: i64,
    pub extraction_date: String,
    pub extraction_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record carried no extraction timestamp and `now` was used.
    #[serde(skip)]
    pub extraction_date_defaulted: bool,
}

impl ProductDocument {
    /// Normalize a raw record. `now` stamps `created_at`, `updated_at` and a
    /// missing extraction date.
    pub fn from_record(record: &RawRecord, now: DateTime<Utc>) -> Result<Self, RecordError> {
        if !record.is_object() {
            return Err(RecordError::NotAnObject(record.kind()));
        }

        let identity = record_identity(record).into_string();
        let currency = record.text(Field::Currency);
        let extraction_date = record.text(Field::ExtractionDate);
        let extraction_date_defaulted = extraction_date.is_empty();

        Ok(Self {
            id: identity.clone(),
            product_id: identity,
            product_hash: compute_fingerprint(record).into_string(),
            counter: record.integer(Field::Counter).unwrap_or(0),
            counter_total: record.integer(Field::CounterTotal).unwrap_or(0),
            name: record.text(Field::Title),
            brand: record.text(Field::Brand),
            category: record.text(Field::Category),
            price_text: record.text(Field::PriceText),
            price: record.price_value(),
            currency: if currency.is_empty() {
                "COP".to_string()
            } else {
                currency
            },
            size: record.text(Field::Size),
            rating: record.rating(),
            additional_details: record.text(Field::Details),
            source: record.text(Field::Source),
            image_url: record.text(Field::ImageUrl),
            product_link: record.text(Field::ProductUrl),
            page: record.integer(Field::Page).unwrap_or(1),
            extraction_date: if extraction_date_defaulted {
                now.to_rfc3339()
            } else {
                extraction_date
            },
            extraction_status: record.text(Field::ExtractionStatus),
            created_at: now,
            updated_at: now,
            extraction_date_defaulted,
        })
    }

    /// True when both documents carry the same content, ignoring the
    /// bookkeeping timestamps.
    pub fn same_content(&self, other: &ProductDocument) -> bool {
        let mut lhs = self.clone();
        lhs.created_at = other.created_at;
        lhs.updated_at = other.updated_at;
        lhs.extraction_date_defaulted = other.extraction_date_defaulted;
        lhs == *other
    }
}

/// Lifecycle of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl SourceStatus {
    pub fn is_success(self) -> bool {
        self == SourceStatus::Succeeded
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Running => "running",
            SourceStatus::Succeeded => "succeeded",
            SourceStatus::Failed => "failed",
            SourceStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Per-source outcome inside a [`RunSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub status: SourceStatus,
    pub artifact: Option<String>,
    pub records_read: usize,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errors: u64,
    pub duration_secs: f64,
}

impl SourceReport {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            status: SourceStatus::Pending,
            artifact: None,
            records_read: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            errors: 0,
            duration_secs: 0.0,
        }
    }
}

/// Immutable record of one pipeline run.
///
/// Serialized with the keys of the historical run artifact
/// (`ejecucion_<timestamp>.json`), so existing dashboards keep reading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    #[serde(rename = "inicio")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "fin")]
    pub finished_at: DateTime<Utc>,
    #[serde(rename = "duracion_segundos")]
    pub duration_secs: f64,
    #[serde(rename = "paginas")]
    pub pages: u32,
    #[serde(rename = "scrapers_intentados")]
    pub sources_attempted: Vec<String>,
    #[serde(rename = "scrapers_ejecutados")]
    pub sources_succeeded: usize,
    #[serde(rename = "scrapers_fallidos")]
    pub sources_failed: usize,
    #[serde(rename = "archivos_generados")]
    pub artifacts: Vec<String>,
    #[serde(rename = "productos_procesados")]
    pub records_processed: u64,
    #[serde(rename = "errores")]
    pub errors: Vec<String>,
    #[serde(rename = "resultados")]
    pub sources: Vec<SourceReport>,
}

impl RunSummary {
    /// An empty summary for a run starting at `started_at`.
    pub fn new(
        run_id: String,
        started_at: DateTime<Utc>,
        sources_attempted: Vec<String>,
        pages: u32,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            duration_secs: 0.0,
            pages,
            sources_attempted,
            sources_succeeded: 0,
            sources_failed: 0,
            artifacts: Vec::new(),
            records_processed: 0,
            errors: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Whether the run accomplished anything (drives the process exit code).
    pub fn anything_accomplished(&self) -> bool {
        self.sources_succeeded > 0
    }
}
