//! Report CSV parsing and row normalization.

use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::NaiveDate;
use thiserror::Error;
use yti_core::{CellValue, Record, ReportJob, COMPOSITE_KEY_FIELD, CREATE_TIME_FIELD, DATE_COLUMN};

/// Fixed-point scale applied to decimal columns.
pub const DECIMAL_SCALE: i64 = 2;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed date {value:?} in row {row}, expected YYYYMMDD")]
    MalformedDate { row: usize, value: String },
    #[error("report is missing column {0}")]
    MissingColumn(String),
    #[error("parsing report csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("reading report {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type RawRow = BTreeMap<String, CellValue>;

/// A downloaded report: header plus typed rows in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReport {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawReport {
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }
}

pub fn parse_report_csv<R: Read>(reader: R) -> Result<RawReport, TransformError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, raw)| (name.clone(), CellValue::parse(raw)))
            .collect::<RawRow>();
        rows.push(row);
    }
    Ok(RawReport { headers, rows })
}

/// `YYYYMMDD` to `YYYY-MM-DDT00:00:00Z`.
pub fn normalize_report_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
    Some(date.format("%Y-%m-%dT00:00:00Z").to_string())
}

/// Rounds to two places, half away from zero, on the shortest decimal form of `value`.
pub fn quantize_decimal(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    let exact = BigDecimal::from_str(&value.to_string()).ok()?;
    Some(exact.with_scale_round(DECIMAL_SCALE, RoundingMode::HalfUp))
}

/// Joins the key columns with `_`; `date` contributes its normalized form.
pub fn composite_key(row: &RawRow, key_columns: &[String], normalized_date: &str) -> String {
    key_columns
        .iter()
        .map(|column| {
            if column == DATE_COLUMN {
                normalized_date.to_string()
            } else {
                row.get(column).unwrap_or(&CellValue::Null).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTransformer;

impl RecordTransformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(
        &self,
        report: &RawReport,
        job: &ReportJob,
        report_create_time: &str,
    ) -> Result<Vec<Record>, TransformError> {
        if report.rows.is_empty() {
            return Ok(Vec::new());
        }

        let required = std::iter::once(DATE_COLUMN)
            .chain(job.composite_key_cols.iter().map(String::as_str))
            .chain(job.decimal_cols.iter().map(String::as_str));
        for column in required {
            if !report.has_column(column) {
                return Err(TransformError::MissingColumn(column.to_string()));
            }
        }

        report
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| self.transform_row(index, row, job, report_create_time))
            .collect()
    }

    fn transform_row(
        &self,
        index: usize,
        row: &RawRow,
        job: &ReportJob,
        report_create_time: &str,
    ) -> Result<Record, TransformError> {
        let raw_date = row.get(DATE_COLUMN).unwrap_or(&CellValue::Null).to_string();
        let date = normalize_report_date(&raw_date).ok_or_else(|| TransformError::MalformedDate {
            row: index + 1,
            value: raw_date.clone(),
        })?;
        let composite_key = composite_key(row, &job.composite_key_cols, &date);

        let mut columns = row.clone();
        for reserved in [DATE_COLUMN, CREATE_TIME_FIELD, COMPOSITE_KEY_FIELD] {
            columns.remove(reserved);
        }
        for column in &job.decimal_cols {
            if let Some(cell) = columns.get_mut(column) {
                if let Some(decimal) = cell.as_float().and_then(quantize_decimal) {
                    *cell = CellValue::Decimal(decimal);
                }
            }
        }

        Ok(Record {
            composite_key,
            create_time: report_create_time.to_string(),
            date,
            columns,
        })
    }
}
