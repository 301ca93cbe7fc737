//! Per-customer collection follow-up notes, kept apart from scoring and
//! joined onto a snapshot for presentation.

use crate::error::Result;
use crate::schema::CustomerRiskSummary;
use crate::utils::{deserialize_flag, normalize_customer_name};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const FOLLOWUP_FILE_NAME: &str = "payment_followup_notes.csv";
pub const DEFAULT_RECOMMENDATION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FollowUpNote {
    pub customer_name: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub approached: bool,
    #[serde(default)]
    pub notes: String,
    /// Customer is out of scope for follow-up.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_na: bool,
    #[serde(default)]
    pub na_notes: String,
}

impl FollowUpNote {
    pub fn blank(customer_name: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentRecommendation {
    RecommendStripe,
    KeepCurrent,
}

impl PaymentRecommendation {
    pub fn for_score(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Self::RecommendStripe
        } else {
            Self::KeepCurrent
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::RecommendStripe => "Recommend Stripe",
            Self::KeepCurrent => "Keep Current",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpRow {
    pub summary: CustomerRiskSummary,
    pub note: FollowUpNote,
    pub recommendation: PaymentRecommendation,
}

/// Left join of a snapshot onto notes: every summary yields exactly one row,
/// in snapshot order; customers without notes get a blank one.
pub fn merge_followups(
    summaries: &[CustomerRiskSummary],
    notes: &[FollowUpNote],
    threshold: f64,
) -> Vec<FollowUpRow> {
    let by_customer: HashMap<String, &FollowUpNote> = notes
        .iter()
        .map(|note| (normalize_customer_name(&note.customer_name), note))
        .collect();

    summaries
        .iter()
        .map(|summary| {
            let key = normalize_customer_name(&summary.customer_name);
            let note = by_customer
                .get(&key)
                .map(|note| FollowUpNote {
                    customer_name: key.clone(),
                    ..(*note).clone()
                })
                .unwrap_or_else(|| FollowUpNote::blank(key.clone()));

            FollowUpRow {
                summary: summary.clone(),
                note,
                recommendation: PaymentRecommendation::for_score(
                    summary.aggregate_risk_score,
                    threshold,
                ),
            }
        })
        .collect()
}

pub fn read_followups<R: Read>(reader: R) -> Result<Vec<FollowUpNote>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut notes = Vec::new();
    for result in csv_reader.deserialize() {
        let mut note: FollowUpNote = result?;
        note.customer_name = normalize_customer_name(&note.customer_name);
        notes.push(note);
    }
    Ok(notes)
}

pub fn write_followups<W: Write>(writer: W, notes: &[FollowUpNote]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for note in notes {
        csv_writer.serialize(note)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// CSV-backed follow-up notes, one file per data directory.
pub struct FollowUpStore {
    path: PathBuf,
}

impl FollowUpStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(FOLLOWUP_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A store that was never saved is empty.
    pub fn load(&self) -> Result<Vec<FollowUpNote>> {
        if !self.path.exists() {
            debug!("No follow-up notes at {}", self.path.display());
            return Ok(Vec::new());
        }
        read_followups(File::open(&self.path)?)
    }

    /// Replaces the stored notes wholesale.
    pub fn save(&self, notes: &[FollowUpNote]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_followups(File::create(&self.path)?, notes)?;
        info!("Saved {} follow-up notes to {}", notes.len(), self.path.display());
        Ok(())
    }
}
