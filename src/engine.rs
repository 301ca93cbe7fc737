use crate::error::{ReceivablesError, Result};
use crate::schema::*;
use crate::utils::normalize_customer_name;
use chrono::NaiveDate;
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Ranks customers by overdue-receivables risk for one evaluation date and
/// one set of weights.
pub struct RiskScorer {
    evaluation_date: NaiveDate,
    weights: RiskWeights,
    policy: InvalidRecordPolicy,
}

// Running totals for one customer while grouping
#[derive(Default)]
struct CustomerAccumulator {
    invoice_count: usize,
    total_balance: f64,
    total_days_overdue: i64,
    high_risk_count: usize,
}

struct BatchMaxima {
    balance: f64,
    days: f64,
    risk_invoices: f64,
}

impl RiskScorer {
    pub fn new(evaluation_date: NaiveDate, weights: RiskWeights) -> Self {
        Self {
            evaluation_date,
            weights,
            policy: InvalidRecordPolicy::Reject,
        }
    }

    /// Validates the weights before anything else, so a bad configuration
    /// never yields a partial score.
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        let weights = config.weights()?;
        Ok(Self::new(config.resolved_evaluation_date(), weights)
            .with_policy(config.invalid_record_policy))
    }

    pub fn with_policy(mut self, policy: InvalidRecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn evaluation_date(&self) -> NaiveDate {
        self.evaluation_date
    }

    pub fn weights(&self) -> RiskWeights {
        self.weights
    }

    pub fn score(&self, invoices: &[OverdueInvoiceRecord]) -> Result<Vec<CustomerRiskSummary>> {
        if invoices.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self.group_by_customer(invoices)?;
        debug!(
            "Grouped {} invoices into {} customers",
            invoices.len(),
            groups.len()
        );

        let raw: Vec<(String, CustomerAccumulator, f64)> = groups
            .into_iter()
            .map(|(name, acc)| {
                let avg_days = acc.total_days_overdue as f64 / acc.invoice_count as f64;
                (name, acc, avg_days)
            })
            .collect();

        let maxima = BatchMaxima {
            balance: fold_max(raw.iter().map(|(_, acc, _)| acc.total_balance)),
            days: fold_max(raw.iter().map(|(_, _, avg)| *avg)),
            risk_invoices: fold_max(raw.iter().map(|(_, acc, _)| acc.high_risk_count as f64)),
        };

        let mut summaries: Vec<CustomerRiskSummary> = raw
            .into_iter()
            .map(|(name, acc, avg_days)| self.summarize(name, &acc, avg_days, &maxima))
            .collect();

        summaries.sort_by(rank_order);

        Ok(summaries)
    }

    fn group_by_customer(
        &self,
        invoices: &[OverdueInvoiceRecord],
    ) -> Result<BTreeMap<String, CustomerAccumulator>> {
        let mut groups: BTreeMap<String, CustomerAccumulator> = BTreeMap::new();

        for (index, invoice) in invoices.iter().enumerate() {
            let name = normalize_customer_name(&invoice.customer_name);
            let running_total = groups.get(&name).map_or(0.0, |acc| acc.total_balance);

            let checked = validate_record(invoice).and_then(|()| {
                let total = running_total + invoice.balance;
                if total.is_finite() {
                    Ok(total)
                } else {
                    Err(format!(
                        "total balance of '{}' overflows after adding {}",
                        name, invoice.balance
                    ))
                }
            });

            let total_balance = match checked {
                Ok(total) => total,
                Err(reason) => match self.policy {
                    InvalidRecordPolicy::Reject => {
                        return Err(ReceivablesError::InvalidRecord { index, reason });
                    }
                    InvalidRecordPolicy::Skip => {
                        warn!("Skipping invoice record #{}: {}", index, reason);
                        continue;
                    }
                },
            };

            let days = invoice.days_overdue(self.evaluation_date);
            let acc = groups.entry(name).or_default();
            acc.invoice_count += 1;
            acc.total_balance = total_balance;
            acc.total_days_overdue += days;
            if invoice.is_high_risk(self.evaluation_date) {
                acc.high_risk_count += 1;
            }
        }

        Ok(groups)
    }

    fn summarize(
        &self,
        customer_name: String,
        acc: &CustomerAccumulator,
        avg_days_overdue: f64,
        maxima: &BatchMaxima,
    ) -> CustomerRiskSummary {
        let normalized_balance = normalize(acc.total_balance, maxima.balance);
        let normalized_days = normalize(avg_days_overdue, maxima.days);
        let normalized_risk_invoices =
            normalize(acc.high_risk_count as f64, maxima.risk_invoices);

        let score = normalized_balance * self.weights.balance_weight()
            + normalized_days * self.weights.days_weight()
            + normalized_risk_invoices * self.weights.invoice_count_weight();

        CustomerRiskSummary {
            customer_name,
            invoice_count: acc.invoice_count,
            total_overdue_balance: acc.total_balance,
            avg_days_overdue,
            high_risk_invoice_count: acc.high_risk_count,
            normalized_balance,
            normalized_days,
            normalized_risk_invoices,
            aggregate_risk_score: score.clamp(0.0, 1.0),
        }
    }
}

fn validate_record(invoice: &OverdueInvoiceRecord) -> std::result::Result<(), String> {
    if normalize_customer_name(&invoice.customer_name).is_empty() {
        return Err("customer name is blank".to_string());
    }
    if !invoice.balance.is_finite() {
        return Err(format!("balance {} is not a finite number", invoice.balance));
    }
    if invoice.balance < 0.0 {
        return Err(format!("balance {} is negative", invoice.balance));
    }
    Ok(())
}

fn fold_max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

/// Batch-relative normalization. A non-positive maximum means nobody in the
/// batch has anything on this metric, so everyone gets 0.
fn normalize(value: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    (value / max).clamp(0.0, 1.0)
}

/// Highest score first, then larger balance, then name.
pub(crate) fn rank_order(a: &CustomerRiskSummary, b: &CustomerRiskSummary) -> Ordering {
    b.aggregate_risk_score
        .total_cmp(&a.aggregate_risk_score)
        .then_with(|| b.total_overdue_balance.total_cmp(&a.total_overdue_balance))
        .then_with(|| a.customer_name.cmp(&b.customer_name))
}
