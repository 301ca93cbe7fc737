use crate::schema::OverdueInvoiceRecord;
use crate::utils::normalize_customer_name;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerBalance {
    pub customer_name: String,
    pub total_balance: f64,
}

/// Headline figures for a set of overdue invoices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverdueOverview {
    pub invoice_count: usize,
    pub total_overdue_balance: f64,
    pub average_invoice_balance: f64,
    pub top_customer: Option<CustomerBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighRiskInvoice {
    pub invoice_number: Option<String>,
    pub customer_name: String,
    pub due_date: NaiveDate,
    pub balance: f64,
    pub days_overdue: i64,
}

pub fn overdue_overview(records: &[OverdueInvoiceRecord]) -> OverdueOverview {
    let total: f64 = records.iter().map(|r| r.balance).sum();
    let average = if records.is_empty() {
        0.0
    } else {
        total / records.len() as f64
    };

    OverdueOverview {
        invoice_count: records.len(),
        total_overdue_balance: total,
        average_invoice_balance: average,
        top_customer: top_customers_by_balance(records, 1).into_iter().next(),
    }
}

/// Customers with the largest summed balance, largest first, ties by name.
pub fn top_customers_by_balance(records: &[OverdueInvoiceRecord], limit: usize) -> Vec<CustomerBalance> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for record in records {
        *totals
            .entry(normalize_customer_name(&record.customer_name))
            .or_default() += record.balance;
    }

    let mut ranked: Vec<CustomerBalance> = totals
        .into_iter()
        .map(|(customer_name, total_balance)| CustomerBalance {
            customer_name,
            total_balance,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.total_balance
            .total_cmp(&a.total_balance)
            .then_with(|| a.customer_name.cmp(&b.customer_name))
    });
    ranked.truncate(limit);
    ranked
}

/// Invoices that are individually high risk as of `evaluation_date`, most
/// overdue first.
pub fn high_risk_invoices(
    records: &[OverdueInvoiceRecord],
    evaluation_date: NaiveDate,
) -> Vec<HighRiskInvoice> {
    let mut flagged: Vec<HighRiskInvoice> = records
        .iter()
        .filter(|r| r.is_high_risk(evaluation_date))
        .map(|r| HighRiskInvoice {
            invoice_number: r.invoice_number.clone(),
            customer_name: r.customer_name.clone(),
            due_date: r.due_date,
            balance: r.balance,
            days_overdue: r.days_overdue(evaluation_date),
        })
        .collect();

    flagged.sort_by(|a, b| {
        b.days_overdue
            .cmp(&a.days_overdue)
            .then_with(|| b.balance.total_cmp(&a.balance))
    });
    flagged
}

pub fn overdue_counts_by_due_date(records: &[OverdueInvoiceRecord]) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.due_date).or_insert(0) += 1;
    }
    counts
}
