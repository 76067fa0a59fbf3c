//! Report export: one JSON artifact per ingestion run.

use crate::report::{RunStatus, ValidationReport};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to create report directory: {0}")]
    CreateDir(String),

    #[error("failed to serialize report: {0}")]
    Serialize(String),

    #[error("failed to write report: {0}")]
    Write(String),
}

/// Save a report as pretty JSON under `dir`, creating the directory on
/// demand. Returns the written path.
///
/// Filename: `report_{batch_prefix}_{vN | aborted}.json`.
pub fn save_report(report: &ValidationReport, dir: &Path) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir).map_err(|e| ReportError::CreateDir(e.to_string()))?;

    let suffix = match &report.status {
        RunStatus::Committed { version } => version.to_string(),
        RunStatus::Aborted { .. } => "aborted".to_string(),
    };
    let path = dir.join(format!("report_{}_{suffix}.json", report.batch_id.short()));

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| ReportError::Serialize(e.to_string()))?;
    fs::write(&path, json).map_err(|e| ReportError::Write(e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SCHEMA_VERSION;
    use coinvault_core::domain::{ArchiveVersion, BatchId};

    fn committed_report() -> ValidationReport {
        ValidationReport {
            schema_version: SCHEMA_VERSION,
            batch_id: BatchId("deadbeefcafe0123".into()),
            total_rows: 1,
            parse_failures: vec![],
            deduplicated: vec![],
            accepted: 1,
            noops: vec![],
            rejected: vec![],
            rejection_ratio: 0.0,
            status: RunStatus::Committed {
                version: ArchiveVersion(7),
            },
            version_before: ArchiveVersion(6),
            version_after: ArchiveVersion(7),
            duration_ms: 3,
        }
    }

    #[test]
    fn saves_and_reloads_report() {
        let dir = std::env::temp_dir().join(format!("coinvault_reports_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let report = committed_report();
        let path = save_report(&report, &dir).unwrap();

        assert!(path.file_name().unwrap().to_str().unwrap().contains("v7"));
        let content = fs::read_to_string(&path).unwrap();
        let parsed: ValidationReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, report);

        let _ = fs::remove_dir_all(&dir);
    }
}
