//! # Receivables Risk
//!
//! A library for ranking customers by the risk carried in their overdue
//! invoices, built around exports from Zoho Books.
//!
//! ## Core Concepts
//!
//! - **Overdue Invoice**: One unpaid invoice with a customer, an outstanding balance and a due date
//! - **High-Risk Invoice**: Overdue for more than 90 days, or carrying a balance above 10,000
//! - **Risk Summary**: Per-customer totals, each factor normalized against the batch maximum
//! - **Aggregate Score**: Weighted sum of the normalized factors, always within [0, 1]
//! - **Snapshot**: A timestamped, write-once CSV of one scoring run
//!
//! ## Example
//!
//! ```rust,ignore
//! use receivables_risk::*;
//! use chrono::NaiveDate;
//!
//! let eval = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
//! let invoices = vec![
//!     OverdueInvoiceRecord::new("Acme Co", 12_000.0, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
//!     OverdueInvoiceRecord::new("Beta Ltd", 800.0, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
//! ];
//!
//! let config = ScoringConfig::default().with_evaluation_date(eval);
//! let ranked = score_customers(&invoices, &config).unwrap();
//! assert_eq!(ranked[0].customer_name, "acme co");
//!
//! let store = SnapshotStore::new("data");
//! store.write_now(&ranked).unwrap();
//! ```

pub mod engine;
pub mod error;
pub mod followup;
pub mod ingestion;
pub mod payments;
pub mod report;
pub mod schema;
pub mod snapshot;
pub mod utils;

#[cfg(feature = "zoho")]
pub mod zoho;

pub use engine::RiskScorer;
pub use error::{ReceivablesError, Result};
pub use followup::*;
pub use ingestion::*;
pub use payments::*;
pub use report::*;
pub use schema::*;
pub use snapshot::*;
pub use utils::*;

use log::{debug, info};
use std::collections::HashSet;

const SCORE_TOLERANCE: f64 = 1e-9;

pub struct RiskProcessor;

impl RiskProcessor {
    pub fn process(
        invoices: &[OverdueInvoiceRecord],
        config: &ScoringConfig,
    ) -> Result<Vec<CustomerRiskSummary>> {
        let scorer = RiskScorer::from_config(config)?;

        info!(
            "Scoring {} overdue invoices as of {}",
            invoices.len(),
            scorer.evaluation_date()
        );

        let summaries = scorer.score(invoices)?;

        if let Some(top) = summaries.first() {
            debug!(
                "Highest risk customer: {} ({:.3})",
                top.customer_name, top.aggregate_risk_score
            );
        }

        Ok(summaries)
    }

    pub fn process_with_verification(
        invoices: &[OverdueInvoiceRecord],
        config: &ScoringConfig,
    ) -> Result<Vec<CustomerRiskSummary>> {
        let summaries = Self::process(invoices, config)?;

        verify_risk_summaries(&summaries, &config.weights()?)?;

        Ok(summaries)
    }
}

pub fn score_customers(
    invoices: &[OverdueInvoiceRecord],
    config: &ScoringConfig,
) -> Result<Vec<CustomerRiskSummary>> {
    RiskProcessor::process(invoices, config)
}

pub fn score_with_verification(
    invoices: &[OverdueInvoiceRecord],
    config: &ScoringConfig,
) -> Result<Vec<CustomerRiskSummary>> {
    RiskProcessor::process_with_verification(invoices, config)
}

/// Checks a ranked result against the guarantees the scorer makes: every
/// normalized factor and score lies in [0, 1], the score is the weighted sum
/// of its factors, customers appear once, and the order is
/// score desc, balance desc, name asc.
pub fn verify_risk_summaries(
    summaries: &[CustomerRiskSummary],
    weights: &RiskWeights,
) -> Result<()> {
    let mut seen = HashSet::new();

    for (idx, summary) in summaries.iter().enumerate() {
        let factors = [
            ("normalized_balance", summary.normalized_balance),
            ("normalized_days", summary.normalized_days),
            ("normalized_risk_invoices", summary.normalized_risk_invoices),
            ("aggregate_risk_score", summary.aggregate_risk_score),
        ];
        for (field, value) in factors {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReceivablesError::RankingViolation(format!(
                    "{} of '{}' is {}, outside [0, 1]",
                    field, summary.customer_name, value
                )));
            }
        }

        let expected = weights.balance_weight() * summary.normalized_balance
            + weights.days_weight() * summary.normalized_days
            + weights.invoice_count_weight() * summary.normalized_risk_invoices;
        if (expected - summary.aggregate_risk_score).abs() > SCORE_TOLERANCE {
            return Err(ReceivablesError::RankingViolation(format!(
                "Score of '{}' is {}, weighted factors give {}",
                summary.customer_name, summary.aggregate_risk_score, expected
            )));
        }

        if !seen.insert(summary.customer_name.as_str()) {
            return Err(ReceivablesError::RankingViolation(format!(
                "Customer '{}' appears more than once",
                summary.customer_name
            )));
        }

        if idx > 0 {
            let prev = &summaries[idx - 1];
            if engine::rank_order(prev, summary) == std::cmp::Ordering::Greater {
                return Err(ReceivablesError::RankingViolation(format!(
                    "'{}' is ranked above '{}' out of order",
                    prev.customer_name, summary.customer_name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> ScoringConfig {
        ScoringConfig::default().with_evaluation_date(date(2024, 6, 30))
    }

    #[test]
    fn test_end_to_end_scoring() {
        let invoices = vec![
            OverdueInvoiceRecord::new("Acme Co", 12_000.0, date(2024, 6, 1)),
            OverdueInvoiceRecord::new(" acme co ", 3_000.0, date(2024, 5, 1)),
            OverdueInvoiceRecord::new("Beta Ltd", 800.0, date(2024, 1, 15)),
            OverdueInvoiceRecord::new("Gamma", 50.0, date(2024, 6, 20)),
        ];

        let ranked = score_with_verification(&invoices, &config()).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].customer_name, "acme co");
        assert_eq!(ranked[0].invoice_count, 2);
        assert_eq!(ranked[0].total_overdue_balance, 15_000.0);
        assert_eq!(ranked[2].customer_name, "gamma");
    }

    #[test]
    fn test_empty_batch() {
        let ranked = score_with_verification(&[], &config()).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_verification_rejects_out_of_order() {
        let invoices = vec![
            OverdueInvoiceRecord::new("A", 100.0, date(2024, 6, 1)),
            OverdueInvoiceRecord::new("B", 10.0, date(2024, 6, 29)),
        ];
        let mut ranked = score_customers(&invoices, &config()).unwrap();
        ranked.reverse();

        let err = verify_risk_summaries(&ranked, &RiskWeights::default()).unwrap_err();
        assert!(matches!(err, ReceivablesError::RankingViolation(_)));
    }

    #[test]
    fn test_verification_rejects_wrong_weights() {
        let invoices = vec![
            OverdueInvoiceRecord::new("A", 100.0, date(2024, 6, 1)),
            OverdueInvoiceRecord::new("B", 10.0, date(2024, 3, 1)),
        ];
        let ranked = score_customers(&invoices, &config()).unwrap();
        let other = RiskWeights::new(1.0, 0.0).unwrap();

        assert!(verify_risk_summaries(&ranked, &other).is_err());
    }

    #[test]
    fn test_invalid_weights_fail_before_scoring() {
        let bad = config().with_weights(0.8, 0.5);
        let invoices = vec![OverdueInvoiceRecord::new("A", 100.0, date(2024, 6, 1))];

        let err = score_customers(&invoices, &bad).unwrap_err();
        assert!(matches!(err, ReceivablesError::InvalidWeights { .. }));
    }
}
