//! Timestamped, write-once CSV snapshots of scoring runs.
//!
//! Each run lands in its own `overdue_customer_risk_scores_{YYYYMMDD_HHMMSS}.csv`.
//! Consumers pick the newest by file name, which sorts chronologically.

use crate::error::Result;
use crate::schema::CustomerRiskSummary;
use crate::utils::normalize_customer_name;
use chrono::{Local, NaiveDateTime};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SNAPSHOT_PREFIX: &str = "overdue_customer_risk_scores_";
const SNAPSHOT_SUFFIX: &str = ".csv";

/// Column order of a snapshot, matching the fields of `CustomerRiskSummary`.
pub const SNAPSHOT_COLUMNS: [&str; 9] = [
    "customer_name",
    "invoice_count",
    "total_overdue_balance",
    "avg_days_overdue",
    "high_risk_invoice_count",
    "normalized_balance",
    "normalized_days",
    "normalized_risk_invoices",
    "aggregate_risk_score",
];

pub fn snapshot_file_name(timestamp: NaiveDateTime) -> String {
    format!(
        "{}{}{}",
        SNAPSHOT_PREFIX,
        timestamp.format("%Y%m%d_%H%M%S"),
        SNAPSHOT_SUFFIX
    )
}

/// An empty ranking still gets its header row.
pub fn write_summaries_csv<W: Write>(writer: W, summaries: &[CustomerRiskSummary]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    if summaries.is_empty() {
        csv_writer.write_record(SNAPSHOT_COLUMNS)?;
    }
    for summary in summaries {
        csv_writer.serialize(summary)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn read_summaries_csv<R: Read>(reader: R) -> Result<Vec<CustomerRiskSummary>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut summaries = Vec::new();
    for result in csv_reader.deserialize() {
        let mut summary: CustomerRiskSummary = result?;
        summary.customer_name = normalize_customer_name(&summary.customer_name);
        summaries.push(summary);
    }
    Ok(summaries)
}

pub fn snapshot_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CustomerRiskSummary)
}

/// Newest file in `dir` whose name starts with `prefix` and ends with
/// `suffix`, by lexicographic file-name order. A missing directory has no
/// files.
pub fn latest_with_prefix(dir: &Path, prefix: &str, suffix: &str) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        if latest.as_ref().map_or(true, |(best, _)| name > *best) {
            latest = Some((name, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fails with `AlreadyExists` rather than overwrite an earlier snapshot.
    /// The file only appears under its final name once fully written.
    pub fn write(
        &self,
        summaries: &[CustomerRiskSummary],
        timestamp: NaiveDateTime,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(snapshot_file_name(timestamp));

        let mut staged = NamedTempFile::new_in(&self.dir)?;
        write_summaries_csv(&mut staged, summaries)?;
        staged.as_file().sync_all()?;
        staged.persist_noclobber(&path).map_err(|e| e.error)?;

        info!(
            "Wrote risk snapshot with {} customers to {}",
            summaries.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn write_now(&self, summaries: &[CustomerRiskSummary]) -> Result<PathBuf> {
        self.write(summaries, Local::now().naive_local())
    }

    pub fn latest_path(&self) -> Result<Option<PathBuf>> {
        latest_with_prefix(&self.dir, SNAPSHOT_PREFIX, SNAPSHOT_SUFFIX)
    }

    pub fn read(&self, path: &Path) -> Result<Vec<CustomerRiskSummary>> {
        read_summaries_csv(File::open(path)?)
    }

    pub fn load_latest(&self) -> Result<Option<(PathBuf, Vec<CustomerRiskSummary>)>> {
        let Some(path) = self.latest_path()? else {
            debug!("No risk snapshots in {}", self.dir.display());
            return Ok(None);
        };
        let summaries = self.read(&path)?;
        Ok(Some((path, summaries)))
    }
}
