//! Record normalizer — raw untyped rows to canonical `AssetRecord`s.
//!
//! A raw row is a mapping of field name to untyped JSON value, produced by
//! whatever source format the batch arrived in (CSV, JSONL). Normalization
//! is a pure function of the row: it coerces numeric-looking text to f64 at
//! fixed precision, parses dates, and rejects rows that are missing any
//! required field or carry an unparsable value.

use crate::domain::AssetRecord;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// A raw input row: field name → untyped value.
///
/// BTreeMap (not HashMap) so serialization is canonical and batch hashes
/// are stable across runs.
pub type RawRow = BTreeMap<String, Value>;

/// Numeric fields are rounded to this many decimal places, so that two
/// submissions of the same logical record compare bit-for-bit equal.
pub const PRICE_DECIMALS: i32 = 8;

/// Why a raw row could not be normalized. Every variant names the field.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ParseError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("field '{field}' is not a YYYY-MM-DD date: '{value}'")]
    InvalidDate { field: String, value: String },

    #[error("asset id is empty")]
    EmptyAssetId,
}

/// A parse failure tied back to its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub error: ParseError,
}

/// Accepted aliases for the asset identifier, in lookup order.
/// The original dataset ships both `coin_id` and `symbol` columns.
const ASSET_ID_ALIASES: [&str; 3] = ["asset_id", "symbol", "coin_id"];

/// Normalize a single raw row into an `AssetRecord`.
///
/// Pure and side-effect-free. Field coercions:
/// - numbers: JSON numbers, or strings with optional thousands separators
/// - dates: `YYYY-MM-DD` strings
/// - asset id: uppercased, must be non-empty
pub fn normalize_row(row: &RawRow) -> Result<AssetRecord, ParseError> {
    let asset_id = parse_asset_id(row)?;
    let date = parse_date(row, "date")?;
    let ath_date = parse_date(row, "ath_date")?;

    Ok(AssetRecord {
        asset_id,
        date,
        open: parse_number(row, "open")?,
        high: parse_number(row, "high")?,
        low: parse_number(row, "low")?,
        close: parse_number(row, "close")?,
        volume: parse_number(row, "volume")?,
        market_cap: parse_number(row, "market_cap")?,
        circulating_supply: parse_number(row, "circulating_supply")?,
        ath: parse_number(row, "ath")?,
        ath_date,
    })
}

/// Normalize a whole batch in parallel, preserving arrival order.
///
/// Returns the normalized records (in input order, failed rows excluded)
/// and the per-row errors (also in input order).
pub fn normalize_batch(rows: &[RawRow]) -> (Vec<AssetRecord>, Vec<RowError>) {
    let results: Vec<Result<AssetRecord, RowError>> = rows
        .par_iter()
        .enumerate()
        .map(|(row_index, row)| {
            normalize_row(row).map_err(|error| RowError { row_index, error })
        })
        .collect();

    let mut records = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(rec) => records.push(rec),
            Err(e) => errors.push(e),
        }
    }
    (records, errors)
}

fn parse_asset_id(row: &RawRow) -> Result<String, ParseError> {
    for alias in ASSET_ID_ALIASES {
        if let Some(value) = row.get(alias) {
            let s = match value {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if s.is_empty() {
                return Err(ParseError::EmptyAssetId);
            }
            return Ok(s.to_uppercase());
        }
    }
    Err(ParseError::MissingField {
        field: "asset_id".into(),
    })
}

fn parse_number(row: &RawRow, field: &str) -> Result<f64, ParseError> {
    let value = row.get(field).ok_or_else(|| ParseError::MissingField {
        field: field.to_string(),
    })?;

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        Value::Null => {
            return Err(ParseError::MissingField {
                field: field.to_string(),
            })
        }
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(round_fixed(v)),
        _ => Err(ParseError::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_date(row: &RawRow, field: &str) -> Result<NaiveDate, ParseError> {
    let value = row.get(field).ok_or_else(|| ParseError::MissingField {
        field: field.to_string(),
    })?;

    let s = match value {
        Value::String(s) => s.trim(),
        Value::Null => {
            return Err(ParseError::MissingField {
                field: field.to_string(),
            })
        }
        _ => {
            return Err(ParseError::InvalidDate {
                field: field.to_string(),
                value: value.to_string(),
            })
        }
    };

    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ParseError::InvalidDate {
        field: field.to_string(),
        value: s.to_string(),
    })
}

/// Round to `PRICE_DECIMALS` decimal places.
pub fn round_fixed(v: f64) -> f64 {
    let factor = 10f64.powi(PRICE_DECIMALS);
    (v * factor).round() / factor
}
