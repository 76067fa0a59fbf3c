//! Invariant validation for deduplicated record batches.
//!
//! Checks run per record, short-circuiting at the first failure:
//! 1. no missing (non-finite) values
//! 2. price positivity and low/high ordering
//! 3. key not already committed with conflicting values — an identical
//!    re-submission is a harmless noop, not a rejection
//!
//! Records are independent, so the checks run in parallel; results come
//! back in input order.

use crate::archive::ArchiveSnapshot;
use crate::domain::{AssetRecord, RecordKey};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a normalized record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("record has missing values")]
    MissingField,

    #[error("negative or zero price, or negative quantity")]
    NegativePrice,

    #[error("low/high ordering violated")]
    InvalidRange,

    #[error("key already committed with conflicting values")]
    ConflictingDuplicate,
}

/// A rejected record with its reason, keyed for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub key: RecordKey,
    pub reason: RejectReason,
}

/// Partition of a batch after validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Records that passed every check and are new to the archive.
    pub accepted: Vec<AssetRecord>,
    /// Keys already committed with identical values: accepted as noops,
    /// not rewritten.
    pub noops: Vec<RecordKey>,
    /// Everything else, with reasons.
    pub rejected: Vec<Rejection>,
}

impl ValidationOutcome {
    /// Records examined: accepted + noops + rejected.
    pub fn total(&self) -> usize {
        self.accepted.len() + self.noops.len() + self.rejected.len()
    }
}

enum Verdict {
    Accept(AssetRecord),
    Noop(RecordKey),
    Reject(Rejection),
}

/// Validate one record against the invariants and the committed archive.
pub fn validate_record(
    record: &AssetRecord,
    committed: &ArchiveSnapshot,
) -> Result<(), RejectReason> {
    if record.has_missing_values() {
        return Err(RejectReason::MissingField);
    }
    if !record.prices_positive() {
        return Err(RejectReason::NegativePrice);
    }
    if !record.range_consistent() {
        return Err(RejectReason::InvalidRange);
    }
    if let Some(existing) = committed.get(&record.key()) {
        if existing != record {
            return Err(RejectReason::ConflictingDuplicate);
        }
    }
    Ok(())
}

/// Validate a deduplicated batch in parallel.
pub fn validate_batch(records: &[AssetRecord], committed: &ArchiveSnapshot) -> ValidationOutcome {
    let verdicts: Vec<Verdict> = records
        .par_iter()
        .map(|record| match validate_record(record, committed) {
            Ok(()) => {
                if committed.get(&record.key()).is_some() {
                    Verdict::Noop(record.key())
                } else {
                    Verdict::Accept(record.clone())
                }
            }
            Err(reason) => Verdict::Reject(Rejection {
                key: record.key(),
                reason,
            }),
        })
        .collect();

    let mut outcome = ValidationOutcome::default();
    for verdict in verdicts {
        match verdict {
            Verdict::Accept(rec) => outcome.accepted.push(rec),
            Verdict::Noop(key) => outcome.noops.push(key),
            Verdict::Reject(rej) => outcome.rejected.push(rej),
        }
    }
    outcome
}
