use crate::error::{ReceivablesError, Result};
use crate::utils::{days_overdue, is_high_risk};
use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BALANCE_WEIGHT: f64 = 0.5;
pub const DEFAULT_DAYS_WEIGHT: f64 = 0.3;

// Absorbs float noise when two slider values are meant to sum to exactly 1.0.
const WEIGHT_SUM_EPSILON: f64 = 1e-9;

/// One overdue invoice as seen by the risk scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct OverdueInvoiceRecord {
    #[serde(default)]
    #[schemars(description = "Invoice number, carried for reporting only")]
    pub invoice_number: Option<String>,

    #[schemars(
        description = "Customer identifier. Compared case-insensitively after trimming whitespace."
    )]
    pub customer_name: String,

    #[schemars(description = "Outstanding balance on the invoice. Must not be negative.")]
    pub balance: f64,

    #[schemars(description = "Date the invoice became due, YYYY-MM-DD")]
    pub due_date: NaiveDate,
}

impl OverdueInvoiceRecord {
    pub fn new(customer_name: impl Into<String>, balance: f64, due_date: NaiveDate) -> Self {
        Self {
            invoice_number: None,
            customer_name: customer_name.into(),
            balance,
            due_date,
        }
    }

    pub fn with_invoice_number(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = Some(invoice_number.into());
        self
    }

    pub fn days_overdue(&self, evaluation_date: NaiveDate) -> i64 {
        days_overdue(self.due_date, evaluation_date)
    }

    pub fn is_high_risk(&self, evaluation_date: NaiveDate) -> bool {
        is_high_risk(self.days_overdue(evaluation_date), self.balance)
    }
}

/// Per-customer aggregate produced by one scoring run. Normalized fields are
/// relative to the batch they were computed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CustomerRiskSummary {
    #[schemars(description = "Normalized (trimmed, lowercased) customer name")]
    pub customer_name: String,

    #[schemars(description = "Number of overdue invoices aggregated for this customer")]
    pub invoice_count: usize,

    pub total_overdue_balance: f64,

    pub avg_days_overdue: f64,

    #[schemars(description = "Invoices more than 90 days overdue or with a balance above 10000")]
    pub high_risk_invoice_count: usize,

    pub normalized_balance: f64,

    pub normalized_days: f64,

    pub normalized_risk_invoices: f64,

    #[schemars(description = "Weighted combination of the normalized metrics, in [0, 1]")]
    pub aggregate_risk_score: f64,
}

/// Scoring weights. Balance and days weights are chosen independently; the
/// invoice-count weight is whatever remains of 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRiskWeights")]
pub struct RiskWeights {
    balance_weight: f64,
    days_weight: f64,
}

#[derive(Deserialize)]
struct RawRiskWeights {
    balance_weight: f64,
    days_weight: f64,
}

impl TryFrom<RawRiskWeights> for RiskWeights {
    type Error = ReceivablesError;

    fn try_from(raw: RawRiskWeights) -> Result<Self> {
        Self::new(raw.balance_weight, raw.days_weight)
    }
}

impl RiskWeights {
    pub fn new(balance_weight: f64, days_weight: f64) -> Result<Self> {
        let reject = |reason: &str| ReceivablesError::InvalidWeights {
            balance_weight,
            days_weight,
            reason: reason.to_string(),
        };

        if !balance_weight.is_finite() || !days_weight.is_finite() {
            return Err(reject("weights must be finite numbers"));
        }
        if !(0.0..=1.0).contains(&balance_weight) || !(0.0..=1.0).contains(&days_weight) {
            return Err(reject("each weight must be between 0.0 and 1.0"));
        }
        if balance_weight + days_weight > 1.0 + WEIGHT_SUM_EPSILON {
            return Err(reject(
                "balance and days weights must not sum to more than 1.0",
            ));
        }

        Ok(Self {
            balance_weight,
            days_weight,
        })
    }

    pub fn balance_weight(&self) -> f64 {
        self.balance_weight
    }

    pub fn days_weight(&self) -> f64 {
        self.days_weight
    }

    /// Derived; never negative.
    pub fn invoice_count_weight(&self) -> f64 {
        (1.0 - self.balance_weight - self.days_weight).max(0.0)
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            balance_weight: DEFAULT_BALANCE_WEIGHT,
            days_weight: DEFAULT_DAYS_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRecordPolicy {
    #[default]
    #[schemars(description = "Abort the whole batch on the first invalid record")]
    Reject,

    #[schemars(description = "Drop invalid records with a warning and score the rest")]
    Skip,
}

/// Caller-adjustable scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ScoringConfig {
    #[schemars(
        description = "Reference date for days overdue, YYYY-MM-DD. Defaults to the current local date."
    )]
    pub evaluation_date: Option<NaiveDate>,

    #[schemars(description = "Weight of the normalized overdue balance, 0.0 to 1.0")]
    pub balance_weight: f64,

    #[schemars(
        description = "Weight of the normalized average days overdue, 0.0 to 1.0. balance_weight + days_weight must not exceed 1.0; the high-risk invoice count gets the remainder."
    )]
    pub days_weight: f64,

    pub invalid_record_policy: InvalidRecordPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            evaluation_date: None,
            balance_weight: DEFAULT_BALANCE_WEIGHT,
            days_weight: DEFAULT_DAYS_WEIGHT,
            invalid_record_policy: InvalidRecordPolicy::Reject,
        }
    }
}

impl ScoringConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.weights()?;
        Ok(config)
    }

    pub fn with_evaluation_date(mut self, date: NaiveDate) -> Self {
        self.evaluation_date = Some(date);
        self
    }

    pub fn with_weights(mut self, balance_weight: f64, days_weight: f64) -> Self {
        self.balance_weight = balance_weight;
        self.days_weight = days_weight;
        self
    }

    pub fn with_policy(mut self, policy: InvalidRecordPolicy) -> Self {
        self.invalid_record_policy = policy;
        self
    }

    pub fn weights(&self) -> Result<RiskWeights> {
        RiskWeights::new(self.balance_weight, self.days_weight)
    }

    pub fn resolved_evaluation_date(&self) -> NaiveDate {
        self.evaluation_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ScoringConfig)
    }
}

/// A Zoho Books organization to pull invoices from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationConfig {
    pub name: String,
    pub organization_id: String,
}

impl OrganizationConfig {
    pub fn new(name: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization_id: organization_id.into(),
        }
    }
}
