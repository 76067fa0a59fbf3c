//! Batch ingestion for the coinvault archive.
//!
//! This crate drives raw rows through the core pipeline (normalize, dedup,
//! validate, commit) under a configurable policy, and records every run in
//! a serializable `ValidationReport`. It also owns the file-facing pieces:
//! batch loading, report export, config, and synthetic data generation.

pub mod batch;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod reporting;
pub mod synthetic;

pub use batch::{load_batch, save_batch_csv, BatchError};
pub use config::{ConfigError, IngestConfig};
pub use orchestrator::{
    run_ingest, run_ingest_with_write_check, IngestProgress, RunOutcome, StdoutProgress,
};
pub use report::{AbortReason, RunStatus, ValidationReport, SCHEMA_VERSION};
pub use reporting::{save_report, ReportError};
