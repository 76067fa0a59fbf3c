//! The per-run validation report — the machine-readable record of every
//! ingestion run, commit or abort.

use coinvault_core::archive::CommitError;
use coinvault_core::dedup::DroppedDuplicate;
use coinvault_core::domain::{ArchiveVersion, BatchId, RecordKey};
use coinvault_core::normalize::RowError;
use coinvault_core::validate::Rejection;
use serde::{Deserialize, Serialize};

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

/// Why a run was aborted. Aborts always carry the full report; callers
/// never receive a bare failure code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    /// The rejection ratio exceeded the configured maximum.
    RejectionRatioExceeded { ratio: f64, max: f64 },

    /// The run's wall-clock budget expired before commit.
    TimeBudgetExceeded { budget_secs: u64 },

    /// The storage layer failed during the atomic write; the archive was
    /// rolled back to its prior version.
    Commit { error: CommitError },
}

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Committed { version: ArchiveVersion },
    Aborted { reason: AbortReason },
}

/// One ingestion run's full accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Content hash of the raw input batch.
    pub batch_id: BatchId,

    /// Raw rows received.
    pub total_rows: usize,

    /// Rows that failed normalization, with row index and offending field.
    pub parse_failures: Vec<RowError>,

    /// Same-batch duplicates dropped by the last-arrival-wins policy.
    pub deduplicated: Vec<DroppedDuplicate>,

    /// Records that passed every check and were new to the archive.
    pub accepted: usize,

    /// Identical re-submissions of already-committed records.
    pub noops: Vec<RecordKey>,

    /// Every rejection with its key and reason.
    pub rejected: Vec<Rejection>,

    /// (parse failures + rejections) / total rows; 0 for an empty batch.
    pub rejection_ratio: f64,

    pub status: RunStatus,
    pub version_before: ArchiveVersion,
    pub version_after: ArchiveVersion,
    pub duration_ms: u64,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl ValidationReport {
    pub fn is_committed(&self) -> bool {
        matches!(self.status, RunStatus::Committed { .. })
    }

    /// One-line human summary for CLI output.
    pub fn summary(&self) -> String {
        let status = match &self.status {
            RunStatus::Committed { version } => format!("committed at {version}"),
            RunStatus::Aborted { reason } => format!("ABORTED ({reason:?})"),
        };
        format!(
            "batch {}: {} rows, {} accepted, {} noop, {} rejected, {} parse failures, {} deduped — {}",
            self.batch_id.short(),
            self.total_rows,
            self.accepted,
            self.noops.len(),
            self.rejected.len(),
            self.parse_failures.len(),
            self.deduplicated.len(),
            status
        )
    }
}
