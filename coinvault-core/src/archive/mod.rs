//! The versioned archive: single writer, concurrent readers, whole-batch
//! atomic commits.
//!
//! Layout of the locking discipline:
//! - `commit_lock` (Mutex) serializes writers — at most one commit in flight.
//! - `state` (RwLock) guards the published version. The writer stages the
//!   candidate map *outside* this lock and takes the write guard only for
//!   the final swap, so readers are never exposed to a partially committed
//!   batch and are blocked only for the duration of a pointer swap.
//!
//! Records inside the map are shared via `Arc`, so snapshots are cheap and
//! a failed commit leaves the prior version untouched bit for bit.

pub mod store;

use crate::domain::{ArchiveVersion, AssetRecord, RecordKey};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Storage-layer failure during a commit. Fatal to the batch: the archive
/// rolls back to its prior version and the error is propagated to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum CommitError {
    #[error("storage constraint violated for {key}: {reason}")]
    ConstraintViolation { key: RecordKey, reason: String },

    #[error("integrity check failed for {key} during write")]
    IntegrityViolation { key: RecordKey },

    #[error("storage I/O failed: {0}")]
    StorageIo(String),
}

/// Final per-record check applied during the write phase of a commit.
///
/// This is the seam where a real storage backend surfaces constraint
/// violations; tests inject failures here to exercise rollback.
pub trait WriteCheck: Send + Sync {
    fn check(&self, record: &AssetRecord) -> Result<(), CommitError>;
}

/// Production write check: no storage constraints beyond record sanity
/// (which `commit` verifies itself).
pub struct NoopWriteCheck;

impl WriteCheck for NoopWriteCheck {
    fn check(&self, _record: &AssetRecord) -> Result<(), CommitError> {
        Ok(())
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// New records were merged; the archive moved to `version`.
    Committed {
        version: ArchiveVersion,
        inserted: usize,
    },
    /// The batch changed nothing (all records already present with identical
    /// values). The version is not bumped; resubmission is a noop.
    Unchanged { version: ArchiveVersion },
}

impl CommitOutcome {
    pub fn version(&self) -> ArchiveVersion {
        match self {
            CommitOutcome::Committed { version, .. } => *version,
            CommitOutcome::Unchanged { version } => *version,
        }
    }
}

type RecordMap = BTreeMap<RecordKey, AssetRecord>;

#[derive(Debug, Clone)]
struct ArchiveState {
    version: ArchiveVersion,
    records: Arc<RecordMap>,
}

/// A consistent read-only view of one archive version.
///
/// Cheap to clone (shares the record map). Used by the validator for
/// conflict checks and by query tooling.
#[derive(Debug, Clone)]
pub struct ArchiveSnapshot {
    version: ArchiveVersion,
    records: Arc<RecordMap>,
}

impl ArchiveSnapshot {
    /// An empty snapshot at version zero (validation against a fresh archive).
    pub fn empty() -> Self {
        Self {
            version: ArchiveVersion::default(),
            records: Arc::new(BTreeMap::new()),
        }
    }

    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Point lookup by key.
    pub fn get(&self, key: &RecordKey) -> Option<&AssetRecord> {
        self.records.get(key)
    }

    /// Range scan: all records for `asset_id` with `from <= date <= to`,
    /// ordered by date ascending.
    pub fn range(&self, asset_id: &str, from: NaiveDate, to: NaiveDate) -> Vec<AssetRecord> {
        if from > to {
            return Vec::new();
        }
        let lo = RecordKey::new(asset_id, from);
        let hi = RecordKey::new(asset_id, to);
        self.records
            .range(lo..=hi)
            .map(|(_, rec)| rec.clone())
            .collect()
    }

    /// Latest snapshot for an asset: the record with the greatest date.
    pub fn latest(&self, asset_id: &str) -> Option<AssetRecord> {
        let lo = RecordKey::new(asset_id, NaiveDate::MIN);
        let hi = RecordKey::new(asset_id, NaiveDate::MAX);
        self.records
            .range(lo..=hi)
            .next_back()
            .map(|(_, rec)| rec.clone())
    }

    /// All distinct asset ids, in order.
    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for key in self.records.keys() {
            if ids.last().map(|s| s.as_str()) != Some(key.asset_id.as_str()) {
                ids.push(key.asset_id.clone());
            }
        }
        ids
    }

    /// Iterate all records in `(asset_id, date)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &AssetRecord)> {
        self.records.iter()
    }

    /// Deterministic BLAKE3 hash over all committed records in key order.
    pub fn data_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, rec) in self.records.iter() {
            hasher.update(key.asset_id.as_bytes());
            hasher.update(key.date.to_string().as_bytes());
            hasher.update(&rec.open.to_le_bytes());
            hasher.update(&rec.high.to_le_bytes());
            hasher.update(&rec.low.to_le_bytes());
            hasher.update(&rec.close.to_le_bytes());
            hasher.update(&rec.volume.to_le_bytes());
            hasher.update(&rec.market_cap.to_le_bytes());
            hasher.update(&rec.circulating_supply.to_le_bytes());
            hasher.update(&rec.ath.to_le_bytes());
            hasher.update(rec.ath_date.to_string().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// The archive: owned, versioned, mutated only via whole-batch commits.
#[derive(Debug)]
pub struct Archive {
    state: RwLock<ArchiveState>,
    commit_lock: Mutex<()>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    /// An empty archive at version zero.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ArchiveState {
                version: ArchiveVersion::default(),
                records: Arc::new(BTreeMap::new()),
            }),
            commit_lock: Mutex::new(()),
        }
    }

    /// Rebuild an archive from persisted records at a known version.
    /// Used by the store when loading from disk.
    pub fn from_records(version: ArchiveVersion, records: Vec<AssetRecord>) -> Self {
        let map: RecordMap = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            state: RwLock::new(ArchiveState {
                version,
                records: Arc::new(map),
            }),
            commit_lock: Mutex::new(()),
        }
    }

    /// Current version. Reads lock-free of the writer except during the swap.
    pub fn version(&self) -> ArchiveVersion {
        self.state.read().expect("archive lock poisoned").version
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("archive lock poisoned")
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A consistent view of the current version.
    pub fn snapshot(&self) -> ArchiveSnapshot {
        let state = self.state.read().expect("archive lock poisoned");
        ArchiveSnapshot {
            version: state.version,
            records: Arc::clone(&state.records),
        }
    }

    /// Point lookup by key.
    pub fn get(&self, key: &RecordKey) -> Option<AssetRecord> {
        self.snapshot().get(key).cloned()
    }

    /// Range scan by asset over a date interval, ordered by date.
    pub fn range(&self, asset_id: &str, from: NaiveDate, to: NaiveDate) -> Vec<AssetRecord> {
        self.snapshot().range(asset_id, from, to)
    }

    /// Latest record for an asset.
    pub fn latest(&self, asset_id: &str) -> Option<AssetRecord> {
        self.snapshot().latest(asset_id)
    }

    /// Merge one batch of accepted records, all-or-nothing.
    ///
    /// Every record passes the final integrity check and the storage write
    /// check before anything becomes visible; the first failure aborts the
    /// whole batch and the archive stays at its prior version. Readers see
    /// the old version until the final swap.
    pub fn commit(
        &self,
        accepted: &[AssetRecord],
        write_check: &dyn WriteCheck,
    ) -> Result<CommitOutcome, CommitError> {
        // Single-writer discipline: one commit in flight at a time.
        let _writer = self.commit_lock.lock().expect("commit lock poisoned");

        let base = self.snapshot();
        let mut candidate: RecordMap = (*base.records).clone();
        let mut inserted = 0usize;

        for record in accepted {
            if !record.is_sane() {
                return Err(CommitError::IntegrityViolation { key: record.key() });
            }
            write_check.check(record)?;

            let key = record.key();
            match candidate.get(&key) {
                Some(existing) if existing == record => {
                    // Identical re-submission: harmless noop.
                }
                _ => {
                    candidate.insert(key, record.clone());
                    inserted += 1;
                }
            }
        }

        if inserted == 0 {
            return Ok(CommitOutcome::Unchanged {
                version: base.version,
            });
        }

        let next = base.version.next();
        let mut state = self.state.write().expect("archive lock poisoned");
        state.version = next;
        state.records = Arc::new(candidate);

        Ok(CommitOutcome::Committed {
            version: next,
            inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(asset: &str, day: u32, close: f64) -> AssetRecord {
        AssetRecord {
            asset_id: asset.into(),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
            market_cap: 1_000_000.0,
            circulating_supply: 100.0,
            ath: close + 10.0,
            ath_date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
        }
    }

    /// Fails on the Nth record it sees (0-based). Simulates a storage-layer
    /// constraint violation partway through a write.
    struct FailOnNth {
        n: usize,
        seen: std::sync::atomic::AtomicUsize,
    }

    impl FailOnNth {
        fn new(n: usize) -> Self {
            Self {
                n,
                seen: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl WriteCheck for FailOnNth {
        fn check(&self, record: &AssetRecord) -> Result<(), CommitError> {
            let i = self
                .seen
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if i == self.n {
                return Err(CommitError::ConstraintViolation {
                    key: record.key(),
                    reason: "simulated".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn commit_bumps_version_and_stores_records() {
        let archive = Archive::new();
        let batch = vec![record("BTC", 1, 100.0), record("ETH", 1, 50.0)];

        let outcome = archive.commit(&batch, &NoopWriteCheck).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                version: ArchiveVersion(1),
                inserted: 2
            }
        );
        assert_eq!(archive.len(), 2);
        assert_eq!(
            archive.get(&batch[0].key()).unwrap().close,
            100.0
        );
    }

    #[test]
    fn identical_resubmission_is_noop() {
        let archive = Archive::new();
        let batch = vec![record("ETH", 1, 50.0)];

        archive.commit(&batch, &NoopWriteCheck).unwrap();
        let outcome = archive.commit(&batch, &NoopWriteCheck).unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Unchanged {
                version: ArchiveVersion(1)
            }
        );
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.version(), ArchiveVersion(1));
    }

    #[test]
    fn failed_write_check_rolls_back_whole_batch() {
        let archive = Archive::new();
        archive
            .commit(&[record("BTC", 1, 100.0)], &NoopWriteCheck)
            .unwrap();
        let before = archive.snapshot();

        let batch = vec![
            record("BTC", 2, 101.0),
            record("BTC", 3, 102.0),
            record("BTC", 4, 103.0),
        ];
        let err = archive.commit(&batch, &FailOnNth::new(1)).unwrap_err();
        assert!(matches!(err, CommitError::ConstraintViolation { .. }));

        // Nothing from the failed batch is observable.
        assert_eq!(archive.version(), before.version());
        assert_eq!(archive.len(), before.len());
        assert!(archive.get(&batch[0].key()).is_none());
        assert_eq!(archive.snapshot().data_hash(), before.data_hash());
    }

    #[test]
    fn insane_record_fails_integrity_check() {
        let archive = Archive::new();
        let mut bad = record("BTC", 1, 100.0);
        bad.low = bad.high + 1.0;

        let err = archive.commit(&[bad], &NoopWriteCheck).unwrap_err();
        assert!(matches!(err, CommitError::IntegrityViolation { .. }));
        assert_eq!(archive.version(), ArchiveVersion(0));
    }

    #[test]
    fn snapshot_isolated_from_later_commits() {
        let archive = Archive::new();
        archive
            .commit(&[record("BTC", 1, 100.0)], &NoopWriteCheck)
            .unwrap();
        let snap = archive.snapshot();

        archive
            .commit(&[record("BTC", 2, 101.0)], &NoopWriteCheck)
            .unwrap();

        assert_eq!(snap.len(), 1);
        assert_eq!(archive.len(), 2);
        assert_eq!(snap.version(), ArchiveVersion(1));
        assert_eq!(archive.version(), ArchiveVersion(2));
    }

    #[test]
    fn range_scan_is_date_ordered_and_inclusive() {
        let archive = Archive::new();
        let batch = vec![
            record("BTC", 3, 103.0),
            record("BTC", 1, 101.0),
            record("BTC", 2, 102.0),
            record("ETH", 2, 50.0),
        ];
        archive.commit(&batch, &NoopWriteCheck).unwrap();

        let scanned = archive.range(
            "BTC",
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        );
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].close, 101.0);
        assert_eq!(scanned[1].close, 102.0);
    }

    #[test]
    fn latest_returns_greatest_date() {
        let archive = Archive::new();
        archive
            .commit(
                &[record("BTC", 1, 101.0), record("BTC", 5, 105.0)],
                &NoopWriteCheck,
            )
            .unwrap();

        let latest = archive.latest("BTC").unwrap();
        assert_eq!(latest.date, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert!(archive.latest("DOGE").is_none());
    }

    #[test]
    fn asset_ids_are_distinct_and_ordered() {
        let archive = Archive::new();
        archive
            .commit(
                &[
                    record("ETH", 1, 50.0),
                    record("BTC", 1, 100.0),
                    record("BTC", 2, 101.0),
                ],
                &NoopWriteCheck,
            )
            .unwrap();

        assert_eq!(archive.snapshot().asset_ids(), vec!["BTC", "ETH"]);
    }

    #[test]
    fn data_hash_changes_with_content() {
        let archive = Archive::new();
        archive
            .commit(&[record("BTC", 1, 100.0)], &NoopWriteCheck)
            .unwrap();
        let h1 = archive.snapshot().data_hash();

        archive
            .commit(&[record("BTC", 2, 101.0)], &NoopWriteCheck)
            .unwrap();
        let h2 = archive.snapshot().data_hash();

        assert_ne!(h1, h2);
    }
}
