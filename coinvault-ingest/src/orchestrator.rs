//! Ingestion orchestrator — drives one batch through the pipeline.
//!
//! Stages: normalize → dedup → validate → policy gate → commit.
//! Two entry points:
//! - `run_ingest()`: production path with the no-op storage write check.
//! - `run_ingest_with_write_check()`: takes an explicit `WriteCheck`,
//!   used by tests to simulate storage failures mid-commit.
//!
//! Every run (commit or abort) produces a full `ValidationReport`.
//! A batch is never partially committed: the rejection-ratio gate, the
//! time budget, and any storage failure all abort the whole batch and
//! leave the archive at its prior version.

use std::time::{Duration, Instant};

use coinvault_core::archive::{Archive, CommitOutcome, NoopWriteCheck, WriteCheck};
use coinvault_core::dedup::dedup_last_wins;
use coinvault_core::domain::BatchId;
use coinvault_core::normalize::{normalize_batch, RawRow};
use coinvault_core::validate::validate_batch;

use crate::config::IngestConfig;
use crate::report::{AbortReason, RunStatus, ValidationReport, SCHEMA_VERSION};

/// Outcome of one ingestion run. Both variants carry the report.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Committed(ValidationReport),
    Aborted(ValidationReport),
}

impl RunOutcome {
    pub fn report(&self) -> &ValidationReport {
        match self {
            RunOutcome::Committed(r) | RunOutcome::Aborted(r) => r,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, RunOutcome::Committed(_))
    }
}

/// Progress callback for long-running ingestion runs.
pub trait IngestProgress: Send {
    /// Called when a pipeline stage begins.
    fn on_stage_start(&self, stage: &str);

    /// Called when a pipeline stage finishes, with a short detail line.
    fn on_stage_complete(&self, stage: &str, detail: &str);

    /// Called once the run is over, commit or abort.
    fn on_run_complete(&self, report: &ValidationReport);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_stage_start(&self, stage: &str) {
        println!("[{stage}] ...");
    }

    fn on_stage_complete(&self, stage: &str, detail: &str) {
        println!("[{stage}] {detail}");
    }

    fn on_run_complete(&self, report: &ValidationReport) {
        println!("{}", report.summary());
    }
}

/// Run one batch through the pipeline with the production write check.
pub fn run_ingest(
    rows: &[RawRow],
    archive: &Archive,
    config: &IngestConfig,
    progress: Option<&dyn IngestProgress>,
) -> RunOutcome {
    run_ingest_with_write_check(rows, archive, config, progress, &NoopWriteCheck)
}

/// Run one batch with an explicit storage write check.
pub fn run_ingest_with_write_check(
    rows: &[RawRow],
    archive: &Archive,
    config: &IngestConfig,
    progress: Option<&dyn IngestProgress>,
    write_check: &dyn WriteCheck,
) -> RunOutcome {
    let started = Instant::now();
    let budget = config.time_budget();
    let batch_id = BatchId::from_rows(rows);
    let version_before = archive.version();

    // Stage 1: normalize (parallel per row).
    if let Some(p) = progress {
        p.on_stage_start("normalize");
    }
    let (records, parse_failures) = normalize_batch(rows);
    if let Some(p) = progress {
        p.on_stage_complete(
            "normalize",
            &format!("{} ok, {} failed", records.len(), parse_failures.len()),
        );
    }

    // Stage 2: dedup (sequential, order-dependent).
    if let Some(p) = progress {
        p.on_stage_start("dedup");
    }
    let deduped = dedup_last_wins(records);
    if let Some(p) = progress {
        p.on_stage_complete("dedup", &format!("{} dropped", deduped.dropped.len()));
    }

    if let Some(reason) = budget_expired(started, budget) {
        return abort(
            archive, batch_id, rows.len(), parse_failures, deduped.dropped,
            Vec::new(), Vec::new(), 0, reason, version_before, started, progress,
        );
    }

    // Stage 3: validate against the committed archive (parallel per record).
    if let Some(p) = progress {
        p.on_stage_start("validate");
    }
    let outcome = validate_batch(&deduped.records, &archive.snapshot());
    if let Some(p) = progress {
        p.on_stage_complete(
            "validate",
            &format!(
                "{} accepted, {} noop, {} rejected",
                outcome.accepted.len(),
                outcome.noops.len(),
                outcome.rejected.len()
            ),
        );
    }

    // Stage 4: policy gate. Hard failures are parse failures plus rejections.
    let hard_failures = parse_failures.len() + outcome.rejected.len();
    let rejection_ratio = if rows.is_empty() {
        0.0
    } else {
        hard_failures as f64 / rows.len() as f64
    };

    if rejection_ratio > config.max_rejection_ratio {
        return abort(
            archive, batch_id, rows.len(), parse_failures, deduped.dropped,
            outcome.noops, outcome.rejected, outcome.accepted.len(),
            AbortReason::RejectionRatioExceeded {
                ratio: rejection_ratio,
                max: config.max_rejection_ratio,
            },
            version_before, started, progress,
        );
    }

    if let Some(reason) = budget_expired(started, budget) {
        return abort(
            archive, batch_id, rows.len(), parse_failures, deduped.dropped,
            outcome.noops, outcome.rejected, outcome.accepted.len(),
            reason, version_before, started, progress,
        );
    }

    // Stage 5: commit, all-or-nothing.
    if let Some(p) = progress {
        p.on_stage_start("commit");
    }
    match archive.commit(&outcome.accepted, write_check) {
        Ok(commit) => {
            let version_after = commit.version();
            if let Some(p) = progress {
                let detail = match commit {
                    CommitOutcome::Committed { inserted, .. } => {
                        format!("{inserted} records, now at {version_after}")
                    }
                    CommitOutcome::Unchanged { .. } => {
                        format!("no effective changes, still at {version_after}")
                    }
                };
                p.on_stage_complete("commit", &detail);
            }

            let report = ValidationReport {
                schema_version: SCHEMA_VERSION,
                batch_id,
                total_rows: rows.len(),
                parse_failures,
                deduplicated: deduped.dropped,
                accepted: outcome.accepted.len(),
                noops: outcome.noops,
                rejected: outcome.rejected,
                rejection_ratio,
                status: RunStatus::Committed {
                    version: version_after,
                },
                version_before,
                version_after,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            if let Some(p) = progress {
                p.on_run_complete(&report);
            }
            RunOutcome::Committed(report)
        }
        Err(error) => abort(
            archive, batch_id, rows.len(), parse_failures, deduped.dropped,
            outcome.noops, outcome.rejected, outcome.accepted.len(),
            AbortReason::Commit { error },
            version_before, started, progress,
        ),
    }
}

fn budget_expired(started: Instant, budget: Option<Duration>) -> Option<AbortReason> {
    let budget = budget?;
    if started.elapsed() >= budget {
        Some(AbortReason::TimeBudgetExceeded {
            budget_secs: budget.as_secs(),
        })
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn abort(
    archive: &Archive,
    batch_id: BatchId,
    total_rows: usize,
    parse_failures: Vec<coinvault_core::normalize::RowError>,
    deduplicated: Vec<coinvault_core::dedup::DroppedDuplicate>,
    noops: Vec<coinvault_core::domain::RecordKey>,
    rejected: Vec<coinvault_core::validate::Rejection>,
    accepted: usize,
    reason: AbortReason,
    version_before: coinvault_core::domain::ArchiveVersion,
    started: Instant,
    progress: Option<&dyn IngestProgress>,
) -> RunOutcome {
    let rejection_ratio = if total_rows == 0 {
        0.0
    } else {
        (parse_failures.len() + rejected.len()) as f64 / total_rows as f64
    };
    let report = ValidationReport {
        schema_version: SCHEMA_VERSION,
        batch_id,
        total_rows,
        parse_failures,
        deduplicated,
        accepted,
        noops,
        rejected,
        rejection_ratio,
        status: RunStatus::Aborted { reason },
        version_before,
        version_after: archive.version(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Some(p) = progress {
        p.on_run_complete(&report);
    }
    RunOutcome::Aborted(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinvault_core::domain::ArchiveVersion;
    use coinvault_core::validate::RejectReason;
    use serde_json::json;

    fn raw_row(symbol: &str, date: &str, low: f64, high: f64, close: f64) -> RawRow {
        let mut row = RawRow::new();
        row.insert("symbol".into(), json!(symbol));
        row.insert("date".into(), json!(date));
        row.insert("open".into(), json!((low + high) / 2.0));
        row.insert("high".into(), json!(high));
        row.insert("low".into(), json!(low));
        row.insert("close".into(), json!(close));
        row.insert("volume".into(), json!(1000.0));
        row.insert("market_cap".into(), json!(1_000_000.0));
        row.insert("circulating_supply".into(), json!(100.0));
        row.insert("ath".into(), json!(high * 2.0));
        row.insert("ath_date".into(), json!("2024-12-17"));
        row
    }

    #[test]
    fn clean_batch_commits() {
        let archive = Archive::new();
        let rows = vec![
            raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0),
            raw_row("ETH", "2025-01-01", 45.0, 55.0, 50.0),
        ];

        let outcome = run_ingest(&rows, &archive, &IngestConfig::default(), None);

        assert!(outcome.is_committed());
        let report = outcome.report();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.version_before, ArchiveVersion(0));
        assert_eq!(report.version_after, ArchiveVersion(1));
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn zero_tolerance_aborts_on_single_rejection() {
        let archive = Archive::new();
        let mut bad = raw_row("BTC", "2025-01-02", 90.0, 95.0, 93.0);
        bad.insert("volume".into(), json!(-5.0));
        let rows = vec![raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0), bad];

        let outcome = run_ingest(&rows, &archive, &IngestConfig::default(), None);

        assert!(!outcome.is_committed());
        let report = outcome.report();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::NegativePrice);
        assert!(matches!(
            report.status,
            RunStatus::Aborted {
                reason: AbortReason::RejectionRatioExceeded { .. }
            }
        ));
        // Nothing committed, not even the good record.
        assert!(archive.is_empty());
        assert_eq!(archive.version(), ArchiveVersion(0));
    }

    #[test]
    fn raised_threshold_commits_partial_batch() {
        let archive = Archive::new();
        let mut bad = raw_row("BTC", "2025-01-02", 90.0, 95.0, 93.0);
        bad.insert("volume".into(), json!(-5.0));
        let rows = vec![raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0), bad];

        let config = IngestConfig {
            max_rejection_ratio: 0.5,
            time_budget_secs: None,
        };
        let outcome = run_ingest(&rows, &archive, &config, None);

        assert!(outcome.is_committed());
        assert_eq!(archive.len(), 1);
        assert_eq!(outcome.report().rejected.len(), 1);
    }

    #[test]
    fn same_batch_dup_with_invalid_range_rejected_after_last_wins() {
        // Duplicate key where the surviving (second) arrival has low > high.
        let archive = Archive::new();
        let rows = vec![
            raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0),
            raw_row("BTC", "2025-01-01", 100.0, 95.0, 96.0),
        ];

        let outcome = run_ingest(&rows, &archive, &IngestConfig::default(), None);

        let report = outcome.report();
        assert_eq!(report.deduplicated.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::InvalidRange);
        assert_eq!(report.accepted, 0);
        assert!(archive.is_empty());
    }

    #[test]
    fn resubmitting_committed_batch_is_noop() {
        let archive = Archive::new();
        let rows = vec![raw_row("ETH", "2025-02-01", 45.0, 55.0, 50.0)];

        let first = run_ingest(&rows, &archive, &IngestConfig::default(), None);
        assert!(first.is_committed());
        let version = archive.version();

        let second = run_ingest(&rows, &archive, &IngestConfig::default(), None);
        assert!(second.is_committed());
        let report = second.report();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.noops.len(), 1);
        assert_eq!(archive.version(), version);
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn conflicting_resubmission_rejected() {
        let archive = Archive::new();
        let rows = vec![raw_row("ETH", "2025-02-01", 45.0, 55.0, 50.0)];
        run_ingest(&rows, &archive, &IngestConfig::default(), None);

        let conflicting = vec![raw_row("ETH", "2025-02-01", 45.0, 55.0, 51.0)];
        let outcome = run_ingest(&conflicting, &archive, &IngestConfig::default(), None);

        assert!(!outcome.is_committed());
        assert_eq!(
            outcome.report().rejected[0].reason,
            RejectReason::ConflictingDuplicate
        );
        assert_eq!(archive.get(&outcome.report().rejected[0].key).unwrap().close, 50.0);
    }

    #[test]
    fn parse_failures_count_toward_rejection_ratio() {
        let archive = Archive::new();
        let mut malformed = raw_row("BTC", "2025-01-02", 90.0, 95.0, 93.0);
        malformed.remove("close");
        let rows = vec![raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0), malformed];

        let outcome = run_ingest(&rows, &archive, &IngestConfig::default(), None);

        assert!(!outcome.is_committed());
        let report = outcome.report();
        assert_eq!(report.parse_failures.len(), 1);
        assert_eq!(report.rejection_ratio, 0.5);
        assert!(archive.is_empty());
    }

    #[test]
    fn empty_batch_commits_as_noop() {
        let archive = Archive::new();
        let outcome = run_ingest(&[], &archive, &IngestConfig::default(), None);

        assert!(outcome.is_committed());
        assert_eq!(outcome.report().rejection_ratio, 0.0);
        assert_eq!(archive.version(), ArchiveVersion(0));
    }

    #[test]
    fn budget_expiry_detection() {
        let started = Instant::now() - Duration::from_secs(10);
        assert!(matches!(
            budget_expired(started, Some(Duration::from_secs(1))),
            Some(AbortReason::TimeBudgetExceeded { budget_secs: 1 })
        ));
        assert!(budget_expired(Instant::now(), Some(Duration::from_secs(60))).is_none());
        assert!(budget_expired(started, None).is_none());
    }

    /// Stalls after the named stage, so a following budget check fires.
    struct StallAfterStage {
        stage: &'static str,
        delay: Duration,
    }

    impl IngestProgress for StallAfterStage {
        fn on_stage_start(&self, _stage: &str) {}

        fn on_stage_complete(&self, stage: &str, _detail: &str) {
            if stage == self.stage {
                std::thread::sleep(self.delay);
            }
        }

        fn on_run_complete(&self, _report: &ValidationReport) {}
    }

    #[test]
    fn expired_budget_aborts_run_without_commit() {
        let archive = Archive::new();
        let rows = vec![raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0)];
        let config = IngestConfig {
            max_rejection_ratio: 0.0,
            time_budget_secs: Some(1),
        };
        // Sleeping for the full budget guarantees the check after dedup fires.
        let stall = StallAfterStage {
            stage: "dedup",
            delay: Duration::from_millis(1100),
        };

        let outcome = run_ingest(&rows, &archive, &config, Some(&stall));

        assert!(!outcome.is_committed());
        let report = outcome.report();
        assert!(matches!(
            report.status,
            RunStatus::Aborted {
                reason: AbortReason::TimeBudgetExceeded { budget_secs: 1 }
            }
        ));
        assert_eq!(report.version_before, report.version_after);
        assert!(archive.is_empty());
        assert_eq!(archive.version(), ArchiveVersion(0));
    }

    #[test]
    fn generous_time_budget_does_not_abort() {
        let archive = Archive::new();
        let rows = vec![raw_row("BTC", "2025-01-01", 90.0, 95.0, 93.0)];
        let config = IngestConfig {
            max_rejection_ratio: 0.0,
            time_budget_secs: Some(3600),
        };
        assert!(run_ingest(&rows, &archive, &config, None).is_committed());
    }
}
