//! Core domain model for YouTube report ingestion.

use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize, Serializer};

pub const CRATE_NAME: &str = "yti-core";

/// Column every report carries in `YYYYMMDD` form.
pub const DATE_COLUMN: &str = "date";
pub const CREATE_TIME_FIELD: &str = "createTime";
pub const COMPOSITE_KEY_FIELD: &str = "composite_key";

/// Per-job parameters as they appear in configuration and invocation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub table_name: String,
    pub composite_key_cols: Vec<String>,
    #[serde(default)]
    pub decimal_cols: Vec<String>,
}

/// A recurring report type and where its rows land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportJob {
    pub job_id: String,
    pub table_name: String,
    pub composite_key_cols: Vec<String>,
    pub decimal_cols: Vec<String>,
}

impl ReportJob {
    pub fn from_params(job_id: impl Into<String>, params: JobParams) -> Self {
        Self {
            job_id: job_id.into(),
            table_name: params.table_name,
            composite_key_cols: params.composite_key_cols,
            decimal_cols: params.decimal_cols,
        }
    }
}

/// One generated report file, as listed by the reporting API.
///
/// The serialized form doubles as the processed-report marker item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInstance {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub create_time: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// A single typed report cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// Fixed-point value produced by decimal normalization.
    Decimal(BigDecimal),
}

impl CellValue {
    /// Types a raw CSV cell: integer, then float, then text. Empty cells are null.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Text(raw.to_string())
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// String coercion used for composite keys.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("nan"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Decimal(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
            // Kept as text so the two fixed decimal places survive storage.
            Self::Decimal(v) => serializer.serialize_str(&v.to_string()),
        }
    }
}

/// One storage-ready report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub composite_key: String,
    #[serde(rename = "createTime")]
    pub create_time: String,
    pub date: String,
    #[serde(flatten)]
    pub columns: BTreeMap<String, CellValue>,
}

impl Record {
    pub fn column(&self, name: &str) -> Option<&CellValue> {
        self.columns.get(name)
    }
}
