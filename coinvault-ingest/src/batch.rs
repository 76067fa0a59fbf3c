//! Batch file loading: raw records as untyped rows.
//!
//! The orchestrator is format-agnostic; this module turns a CSV or JSONL
//! file into the `Vec<RawRow>` the pipeline consumes. CSV cells arrive as
//! strings (the normalizer coerces them); JSONL objects keep their types.

use coinvault_core::normalize::RawRow;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to read batch file: {0}")]
    Io(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("invalid JSON on line {line}: {message}")]
    Json { line: usize, message: String },

    #[error("line {line} is not a JSON object")]
    NotAnObject { line: usize },

    #[error("unsupported batch format '{0}' (expected .csv or .jsonl)")]
    UnsupportedFormat(String),
}

/// Load raw rows from a batch file, dispatching on extension.
pub fn load_batch(path: &Path) -> Result<Vec<RawRow>, BatchError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => load_csv(path),
        Some("jsonl") => load_jsonl(path),
        other => Err(BatchError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn load_csv(path: &Path) -> Result<Vec<RawRow>, BatchError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| BatchError::Csv(e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| BatchError::Csv(e.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| BatchError::Csv(e.to_string()))?;
        let mut row = RawRow::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(cell.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn load_jsonl(path: &Path) -> Result<Vec<RawRow>, BatchError> {
    let content = std::fs::read_to_string(path).map_err(|e| BatchError::Io(e.to_string()))?;

    let mut rows = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| BatchError::Json {
            line: i + 1,
            message: e.to_string(),
        })?;
        match value {
            Value::Object(map) => rows.push(map.into_iter().collect()),
            _ => return Err(BatchError::NotAnObject { line: i + 1 }),
        }
    }
    Ok(rows)
}

/// Write raw rows as a CSV batch file. Column order is the sorted field
/// order of the first row; missing fields are written as empty cells.
pub fn save_batch_csv(rows: &[RawRow], path: &Path) -> Result<(), BatchError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| BatchError::Csv(e.to_string()))?;

    let Some(first) = rows.first() else {
        writer.flush().map_err(|e| BatchError::Io(e.to_string()))?;
        return Ok(());
    };
    let headers: Vec<&String> = first.keys().collect();
    writer
        .write_record(&headers)
        .map_err(|e| BatchError::Csv(e.to_string()))?;

    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| match row.get(*h) {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            })
            .collect();
        writer
            .write_record(&cells)
            .map_err(|e| BatchError::Csv(e.to_string()))?;
    }
    writer.flush().map_err(|e| BatchError::Io(e.to_string()))?;
    Ok(())
}
