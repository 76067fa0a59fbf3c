//! coinvault CLI — batch ingestion and archive query commands.
//!
//! Commands:
//! - `ingest` — run a batch file through the pipeline and persist on commit
//! - `query point|range|latest` — read committed records
//! - `status` — report what the persisted archive contains
//! - `gen` — write a deterministic synthetic batch file

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use coinvault_core::archive::store::ParquetStore;
use coinvault_core::domain::RecordKey;
use coinvault_ingest::{
    load_batch, run_ingest, save_batch_csv, save_report, IngestConfig, StdoutProgress,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "coinvault",
    about = "coinvault CLI — crypto OHLC archive builder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch file (.csv or .jsonl) through the ingestion pipeline.
    Ingest {
        /// Batch file to ingest.
        #[arg(long)]
        input: PathBuf,

        /// Archive directory. Defaults to ./archive.
        #[arg(long, default_value = "archive")]
        archive_dir: PathBuf,

        /// Optional TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for run reports. Defaults to ./reports.
        #[arg(long, default_value = "reports")]
        report_dir: PathBuf,

        /// Override the maximum rejection ratio (0.0 to 1.0).
        #[arg(long)]
        max_rejection_ratio: Option<f64>,

        /// Override the wall-clock budget in seconds.
        #[arg(long)]
        time_budget_secs: Option<u64>,
    },
    /// Read committed records from the archive.
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Report what the persisted archive contains.
    Status {
        /// Archive directory. Defaults to ./archive.
        #[arg(long, default_value = "archive")]
        archive_dir: PathBuf,
    },
    /// Write a deterministic synthetic batch file.
    Gen {
        /// Asset ids to generate (e.g., BTC ETH SOL).
        #[arg(required = true)]
        assets: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Corrupt every Nth row (0 = none).
        #[arg(long, default_value_t = 0)]
        corrupt_every: usize,

        /// Output CSV path.
        #[arg(long, default_value = "batch.csv")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum QueryAction {
    /// One record by asset id and date.
    Point {
        #[arg(long)]
        asset: String,

        /// Date (YYYY-MM-DD).
        #[arg(long)]
        date: String,

        /// Archive directory. Defaults to ./archive.
        #[arg(long, default_value = "archive")]
        archive_dir: PathBuf,
    },
    /// All records for an asset in a date range, inclusive.
    Range {
        #[arg(long)]
        asset: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        from: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        to: String,

        /// Archive directory. Defaults to ./archive.
        #[arg(long, default_value = "archive")]
        archive_dir: PathBuf,
    },
    /// The most recent record for an asset.
    Latest {
        #[arg(long)]
        asset: String,

        /// Archive directory. Defaults to ./archive.
        #[arg(long, default_value = "archive")]
        archive_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            input,
            archive_dir,
            config,
            report_dir,
            max_rejection_ratio,
            time_budget_secs,
        } => run_ingest_cmd(
            input,
            archive_dir,
            config,
            report_dir,
            max_rejection_ratio,
            time_budget_secs,
        ),
        Commands::Query { action } => match action {
            QueryAction::Point {
                asset,
                date,
                archive_dir,
            } => run_query_point(&asset, &date, &archive_dir),
            QueryAction::Range {
                asset,
                from,
                to,
                archive_dir,
            } => run_query_range(&asset, &from, &to, &archive_dir),
            QueryAction::Latest { asset, archive_dir } => run_query_latest(&asset, &archive_dir),
        },
        Commands::Status { archive_dir } => run_status(&archive_dir),
        Commands::Gen {
            assets,
            start,
            end,
            seed,
            corrupt_every,
            out,
        } => run_gen(&assets, &start, &end, seed, corrupt_every, &out),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn run_ingest_cmd(
    input: PathBuf,
    archive_dir: PathBuf,
    config_path: Option<PathBuf>,
    report_dir: PathBuf,
    max_rejection_ratio: Option<f64>,
    time_budget_secs: Option<u64>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => IngestConfig::from_toml_file(&path)?,
        None => IngestConfig::default(),
    };
    if let Some(ratio) = max_rejection_ratio {
        config.max_rejection_ratio = ratio;
    }
    if let Some(secs) = time_budget_secs {
        config.time_budget_secs = Some(secs);
    }
    config.validate()?;

    let rows = load_batch(&input)?;
    println!("Loaded {} rows from {}", rows.len(), input.display());

    let store = ParquetStore::new(&archive_dir);
    let archive = store.load_or_empty()?;
    println!(
        "Archive at {} ({} records, {})",
        archive_dir.display(),
        archive.len(),
        archive.version()
    );

    let outcome = run_ingest(&rows, &archive, &config, Some(&StdoutProgress));

    let report_path = save_report(outcome.report(), &report_dir)?;
    println!("Report saved to: {}", report_path.display());

    if !outcome.is_committed() {
        bail!("run aborted; archive left at {}", archive.version());
    }

    let manifest = store.save(&archive.snapshot())?;
    println!(
        "Persisted {} at {} records={}",
        manifest.version,
        archive_dir.display(),
        manifest.record_count
    );
    Ok(())
}

fn run_query_point(asset: &str, date: &str, archive_dir: &PathBuf) -> Result<()> {
    let archive = ParquetStore::new(archive_dir).load()?;
    let key = RecordKey::new(&asset.to_uppercase(), parse_date(date)?);

    match archive.get(&key) {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("no record for {key}"),
    }
    Ok(())
}

fn run_query_range(asset: &str, from: &str, to: &str, archive_dir: &PathBuf) -> Result<()> {
    let archive = ParquetStore::new(archive_dir).load()?;
    let records = archive.range(&asset.to_uppercase(), parse_date(from)?, parse_date(to)?);

    if records.is_empty() {
        println!("No records for {asset} in {from}..={to}");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn run_query_latest(asset: &str, archive_dir: &PathBuf) -> Result<()> {
    let archive = ParquetStore::new(archive_dir).load()?;

    match archive.latest(&asset.to_uppercase()) {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("no records for asset '{asset}'"),
    }
    Ok(())
}

fn run_status(archive_dir: &PathBuf) -> Result<()> {
    let store = ParquetStore::new(archive_dir);
    let manifest = match store.manifest() {
        Ok(m) => m,
        Err(coinvault_core::archive::store::StoreError::NotInitialized(path)) => {
            println!("Archive not initialized: {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Archive: {}", archive_dir.display());
    println!("Version: {}", manifest.version);
    println!("Records: {}", manifest.record_count);
    println!("Hash:    {}", manifest.data_hash);
    println!("Saved:   {}", manifest.saved_at);
    println!();
    println!(
        "{:<10} {:<25} {:>8}",
        "Asset", "Date Range", "Records"
    );
    println!("{}", "-".repeat(45));
    for asset in &manifest.assets {
        println!(
            "{:<10} {:<25} {:>8}",
            asset.asset_id,
            format!("{} to {}", asset.start_date, asset.end_date),
            asset.record_count
        );
    }
    Ok(())
}

fn run_gen(
    assets: &[String],
    start: &str,
    end: &str,
    seed: u64,
    corrupt_every: usize,
    out: &PathBuf,
) -> Result<()> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if start_date > end_date {
        bail!("start date is after end date");
    }

    let asset_refs: Vec<&str> = assets.iter().map(|s| s.as_str()).collect();
    let mut rows = coinvault_ingest::synthetic::generate_rows(&asset_refs, start_date, end_date, seed);
    let corrupted = coinvault_ingest::synthetic::corrupt_every_nth(&mut rows, corrupt_every);

    save_batch_csv(&rows, out)?;
    println!(
        "Wrote {} rows ({} corrupted) to {}",
        rows.len(),
        corrupted,
        out.display()
    );
    Ok(())
}
