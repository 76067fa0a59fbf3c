//! Parquet persistence for the archive, Hive-style partitioning.
//!
//! Layout: `{root}/asset={ASSET_ID}/records.parquet`, plus `{root}/manifest.json`.
//!
//! Writes are atomic per file (write to .tmp, rename into place) and the
//! manifest is written last — a crash before the manifest rename leaves the
//! previous manifest in place, so the manifest is the durable commit point
//! for the version and the data hash. A crash after some partition renames
//! but before the manifest rename leaves newer partition data readable under
//! the old manifest version; `load` surfaces this as a data-hash mismatch
//! warning and returns the mixed state rather than failing, and the next
//! successful `save` re-aligns partitions and manifest.
//! Unreadable partitions are quarantined on load ({file}.quarantined) with a
//! warning rather than failing the whole load.

use super::{Archive, ArchiveSnapshot};
use crate::domain::{ArchiveVersion, AssetRecord};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("archive store at '{0}' is not initialized")]
    NotInitialized(PathBuf),
}

/// Per-asset summary recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRange {
    pub asset_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub record_count: usize,
}

/// Manifest sidecar: the durable description of one committed archive version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: ArchiveVersion,
    pub record_count: usize,
    pub data_hash: String,
    pub assets: Vec<AssetRange>,
    pub saved_at: chrono::NaiveDateTime,
}

/// The Parquet-backed archive store.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn asset_dir(&self, asset_id: &str) -> PathBuf {
        self.root.join(format!("asset={asset_id}"))
    }

    fn partition_path(&self, asset_id: &str) -> PathBuf {
        self.asset_dir(asset_id).join("records.parquet")
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Persist a committed snapshot. Partitions first, manifest last.
    pub fn save(&self, snapshot: &ArchiveSnapshot) -> Result<ArchiveManifest, StoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| StoreError::Io(format!("create store root: {e}")))?;

        // Group records per asset (keys iterate in (asset, date) order).
        let mut by_asset: BTreeMap<String, Vec<&AssetRecord>> = BTreeMap::new();
        for (key, rec) in snapshot.iter() {
            by_asset.entry(key.asset_id.clone()).or_default().push(rec);
        }

        let mut assets = Vec::with_capacity(by_asset.len());
        for (asset_id, records) in &by_asset {
            let dir = self.asset_dir(asset_id);
            fs::create_dir_all(&dir)
                .map_err(|e| StoreError::Io(format!("create asset dir: {e}")))?;

            let df = records_to_dataframe(records)?;
            let path = self.partition_path(asset_id);
            let tmp = path.with_extension("parquet.tmp");
            write_parquet(&df, &tmp)?;
            fs::rename(&tmp, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp);
                StoreError::Io(format!("atomic rename failed: {e}"))
            })?;

            assets.push(AssetRange {
                asset_id: asset_id.clone(),
                start_date: records.first().map(|r| r.date).unwrap_or(NaiveDate::MIN),
                end_date: records.last().map(|r| r.date).unwrap_or(NaiveDate::MIN),
                record_count: records.len(),
            });
        }

        let manifest = ArchiveManifest {
            version: snapshot.version(),
            record_count: snapshot.len(),
            data_hash: snapshot.data_hash(),
            assets,
            saved_at: chrono::Local::now().naive_local(),
        };

        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| StoreError::Manifest(format!("serialize: {e}")))?;
        let manifest_tmp = self.manifest_path().with_extension("json.tmp");
        fs::write(&manifest_tmp, json)
            .map_err(|e| StoreError::Manifest(format!("write: {e}")))?;
        fs::rename(&manifest_tmp, self.manifest_path())
            .map_err(|e| StoreError::Manifest(format!("rename: {e}")))?;

        Ok(manifest)
    }

    /// Read the manifest without loading any record data.
    pub fn manifest(&self) -> Result<ArchiveManifest, StoreError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Err(StoreError::NotInitialized(self.root.clone()));
        }
        let content =
            fs::read_to_string(&path).map_err(|e| StoreError::Manifest(format!("read: {e}")))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Manifest(format!("parse: {e}")))
    }

    /// Load the archive at its persisted version.
    ///
    /// Unreadable partitions are quarantined and skipped with a warning;
    /// a resulting hash mismatch against the manifest is also warned about.
    pub fn load(&self) -> Result<Archive, StoreError> {
        let manifest = self.manifest()?;

        let mut records = Vec::with_capacity(manifest.record_count);
        for asset in &manifest.assets {
            let path = self.partition_path(&asset.asset_id);
            match load_partition(&path, &asset.asset_id) {
                Ok(recs) => records.extend(recs),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    eprintln!(
                        "WARNING: quarantining unreadable partition {}: {e}",
                        path.display()
                    );
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        let archive = Archive::from_records(manifest.version, records);
        let loaded_hash = archive.snapshot().data_hash();
        if loaded_hash != manifest.data_hash {
            eprintln!(
                "WARNING: archive data hash mismatch (manifest {}, loaded {loaded_hash})",
                manifest.data_hash
            );
        }
        Ok(archive)
    }

    /// Load the archive, or start empty at version zero if never saved.
    pub fn load_or_empty(&self) -> Result<Archive, StoreError> {
        match self.load() {
            Ok(archive) => Ok(archive),
            Err(StoreError::NotInitialized(_)) => Ok(Archive::new()),
            Err(e) => Err(e),
        }
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn records_to_dataframe(records: &[&AssetRecord]) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = records.iter().map(|r| date_to_days(r.date)).collect();
    let ath_dates: Vec<i32> = records.iter().map(|r| date_to_days(r.ath_date)).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), records.iter().map(|r| r.open).collect::<Vec<f64>>()),
        Column::new("high".into(), records.iter().map(|r| r.high).collect::<Vec<f64>>()),
        Column::new("low".into(), records.iter().map(|r| r.low).collect::<Vec<f64>>()),
        Column::new("close".into(), records.iter().map(|r| r.close).collect::<Vec<f64>>()),
        Column::new("volume".into(), records.iter().map(|r| r.volume).collect::<Vec<f64>>()),
        Column::new(
            "market_cap".into(),
            records.iter().map(|r| r.market_cap).collect::<Vec<f64>>(),
        ),
        Column::new(
            "circulating_supply".into(),
            records
                .iter()
                .map(|r| r.circulating_supply)
                .collect::<Vec<f64>>(),
        ),
        Column::new("ath".into(), records.iter().map(|r| r.ath).collect::<Vec<f64>>()),
        Column::new("ath_date".into(), ath_dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("ath_date cast: {e}")))?,
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file =
        fs::File::create(path).map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

const EXPECTED_COLS: [&str; 10] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "market_cap",
    "circulating_supply",
    "ath",
    "ath_date",
];

fn load_partition(path: &Path, asset_id: &str) -> Result<Vec<AssetRecord>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(StoreError::Parquet("empty partition".into()));
    }
    for col in &EXPECTED_COLS {
        if df.column(col).is_err() {
            return Err(StoreError::Parquet(format!("missing column '{col}'")));
        }
    }

    dataframe_to_records(&df, asset_id)
}

fn dataframe_to_records(df: &DataFrame, asset_id: &str) -> Result<Vec<AssetRecord>, StoreError> {
    let col_err = |name: &str, e: PolarsError| StoreError::Parquet(format!("column {name}: {e}"));

    let date_col = df.column("date").map_err(|e| col_err("date", e))?;
    let dates = date_col.date().map_err(|e| col_err("date", e))?;
    let ath_date_col = df.column("ath_date").map_err(|e| col_err("ath_date", e))?;
    let ath_dates = ath_date_col.date().map_err(|e| col_err("ath_date", e))?;

    let f64_col = |name: &str| -> Result<&Float64Chunked, StoreError> {
        df.column(name)
            .map_err(|e| col_err(name, e))?
            .f64()
            .map_err(|e| col_err(name, e))
    };
    let opens = f64_col("open")?;
    let highs = f64_col("high")?;
    let lows = f64_col("low")?;
    let closes = f64_col("close")?;
    let volumes = f64_col("volume")?;
    let market_caps = f64_col("market_cap")?;
    let supplies = f64_col("circulating_supply")?;
    let aths = f64_col("ath")?;

    let epoch = epoch();
    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let date_days = dates
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null date at row {i}")))?;
        let ath_days = ath_dates
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null ath_date at row {i}")))?;

        records.push(AssetRecord {
            asset_id: asset_id.to_string(),
            date: epoch + chrono::Duration::days(date_days as i64),
            open: opens.get(i).unwrap_or(f64::NAN),
            high: highs.get(i).unwrap_or(f64::NAN),
            low: lows.get(i).unwrap_or(f64::NAN),
            close: closes.get(i).unwrap_or(f64::NAN),
            volume: volumes.get(i).unwrap_or(f64::NAN),
            market_cap: market_caps.get(i).unwrap_or(f64::NAN),
            circulating_supply: supplies.get(i).unwrap_or(f64::NAN),
            ath: aths.get(i).unwrap_or(f64::NAN),
            ath_date: epoch + chrono::Duration::days(ath_days as i64),
        });
    }
    Ok(records)
}
