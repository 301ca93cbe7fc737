use crate::error::Result;
use crate::ingestion::InvoiceRow;
use crate::utils::{deserialize_lenient_amount, deserialize_lenient_date, organization_slug};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

pub const UNKNOWN_PAYMENT_MODE: &str = "N/A";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaymentInvoiceRef {
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
}

/// A customer payment as returned by the accounting API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CustomerPayment {
    #[serde(default)]
    pub payment_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub invoices: Vec<PaymentInvoiceRef>,
    /// Comma-separated invoice numbers, present on list responses.
    #[serde(default)]
    pub invoice_numbers: Option<String>,
}

impl CustomerPayment {
    pub fn mode(&self) -> &str {
        match self.payment_mode.as_deref().map(str::trim) {
            Some(mode) if !mode.is_empty() => mode,
            _ => UNKNOWN_PAYMENT_MODE,
        }
    }
}

/// Invoice id or invoice number -> payment mode of the payment that settled it.
#[derive(Debug, Clone, Default)]
pub struct PaymentModeMap {
    modes: HashMap<String, String>,
}

impl PaymentModeMap {
    /// Later payments win when several reference the same invoice.
    pub fn from_payments(payments: &[CustomerPayment]) -> Self {
        let mut modes = HashMap::new();

        for payment in payments {
            let mode = payment.mode().to_string();

            for invoice in &payment.invoices {
                for key in [&invoice.invoice_id, &invoice.invoice_number]
                    .into_iter()
                    .flatten()
                {
                    if !key.is_empty() {
                        modes.insert(key.clone(), mode.clone());
                    }
                }
            }

            if let Some(numbers) = &payment.invoice_numbers {
                for number in numbers.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    modes.insert(number.to_string(), mode.clone());
                }
            }
        }

        debug!(
            "Mapped {} invoice keys from {} payments",
            modes.len(),
            payments.len()
        );
        Self { modes }
    }

    /// Looks up by invoice id first, then invoice number.
    pub fn mode_for(&self, invoice_id: Option<&str>, invoice_number: &str) -> &str {
        invoice_id
            .and_then(|id| self.modes.get(id))
            .or_else(|| self.modes.get(invoice_number))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_PAYMENT_MODE)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

pub fn enrich_with_payment_modes(rows: &mut [InvoiceRow], map: &PaymentModeMap) {
    for row in rows {
        let mode = map.mode_for(row.invoice_id.as_deref(), &row.invoice_number);
        row.payment_mode = Some(mode.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentModeShare {
    pub payment_mode: String,
    /// Whole currency units, halves rounded to even.
    pub total: i64,
    /// Share of the grand total in percent, halves rounded to even.
    pub percentage: i64,
}

/// Breakdown of collected amounts by payment mode, largest first. Payments
/// with a non-positive or non-finite amount are ignored.
pub fn summarize_payment_modes(payments: &[CustomerPayment]) -> Vec<PaymentModeShare> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for payment in payments {
        if payment.amount.is_finite() && payment.amount > 0.0 {
            *totals.entry(payment.mode().to_string()).or_default() += payment.amount;
        }
    }

    let grand_total: f64 = totals.values().sum();
    if grand_total <= 0.0 {
        return Vec::new();
    }

    let mut ordered: Vec<(String, f64)> = totals.into_iter().collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ordered
        .into_iter()
        .map(|(payment_mode, total)| PaymentModeShare {
            payment_mode,
            total: total.round_ties_even() as i64,
            percentage: (total / grand_total * 100.0).round_ties_even() as i64,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyCollection {
    /// `YYYY-MM`
    pub month: String,
    pub payment_mode: String,
    pub amount: f64,
}

/// Collected amount per calendar month and payment mode, oldest month first.
pub fn monthly_collection_trend(payments: &[CustomerPayment]) -> Vec<MonthlyCollection> {
    let mut buckets: BTreeMap<(String, String), f64> = BTreeMap::new();

    for payment in payments {
        let Some(date) = payment.date else { continue };
        if !payment.amount.is_finite() || payment.amount <= 0.0 {
            continue;
        }
        let key = (date.format("%Y-%m").to_string(), payment.mode().to_string());
        *buckets.entry(key).or_default() += payment.amount;
    }

    buckets
        .into_iter()
        .map(|((month, payment_mode), amount)| MonthlyCollection {
            month,
            payment_mode,
            amount,
        })
        .collect()
}

pub fn payment_export_file_name(organization_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_paid_invoice_payments_{}.csv",
        organization_slug(organization_name),
        date.format("%Y-%m-%d")
    )
}

/// One CSV row per (payment, linked invoice).
pub fn write_payment_csv<W: Write>(
    writer: W,
    payments: &[CustomerPayment],
    organization_name: &str,
) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "payment_id",
        "customer_name",
        "payment_mode",
        "amount",
        "date",
        "invoice_number",
        "invoice_id",
        "organization",
    ])?;

    for payment in payments {
        let date = payment
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        for invoice in &payment.invoices {
            csv_writer.write_record([
                payment.payment_id.as_str(),
                payment.customer_name.as_str(),
                payment.mode(),
                payment.amount.to_string().as_str(),
                date.as_str(),
                invoice.invoice_number.as_deref().unwrap_or(""),
                invoice.invoice_id.as_deref().unwrap_or(""),
                organization_name,
            ])?;
        }
    }

    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(mode: Option<&str>, amount: f64, date: Option<NaiveDate>) -> CustomerPayment {
        CustomerPayment {
            payment_id: "p".into(),
            customer_name: "Acme".into(),
            payment_mode: mode.map(str::to_string),
            amount,
            date,
            ..Default::default()
        }
    }

    #[test]
    fn test_payment_mode_map_prefers_invoice_id() {
        let payments = vec![
            CustomerPayment {
                payment_mode: Some("Check".into()),
                invoices: vec![PaymentInvoiceRef {
                    invoice_id: Some("1001".into()),
                    invoice_number: None,
                }],
                ..Default::default()
            },
            CustomerPayment {
                payment_mode: Some("Bank Transfer".into()),
                invoice_numbers: Some("INV-7, INV-8".into()),
                ..Default::default()
            },
        ];

        let map = PaymentModeMap::from_payments(&payments);
        assert_eq!(map.mode_for(Some("1001"), "INV-7"), "Check");
        assert_eq!(map.mode_for(Some("9999"), "INV-7"), "Bank Transfer");
        assert_eq!(map.mode_for(None, "INV-8"), "Bank Transfer");
        assert_eq!(map.mode_for(None, "INV-404"), UNKNOWN_PAYMENT_MODE);
    }

    #[test]
    fn test_missing_mode_maps_to_na() {
        let payments = vec![CustomerPayment {
            payment_mode: Some("  ".into()),
            invoice_numbers: Some("INV-1".into()),
            ..Default::default()
        }];
        let map = PaymentModeMap::from_payments(&payments);
        assert_eq!(map.mode_for(None, "INV-1"), UNKNOWN_PAYMENT_MODE);
    }

    #[test]
    fn test_enrich_rows() {
        let payments = vec![CustomerPayment {
            payment_mode: Some("Stripe".into()),
            invoices: vec![PaymentInvoiceRef {
                invoice_id: None,
                invoice_number: Some("INV-1".into()),
            }],
            ..Default::default()
        }];
        let map = PaymentModeMap::from_payments(&payments);

        let mut rows = vec![
            InvoiceRow {
                invoice_number: "INV-1".into(),
                ..Default::default()
            },
            InvoiceRow {
                invoice_number: "INV-2".into(),
                ..Default::default()
            },
        ];
        enrich_with_payment_modes(&mut rows, &map);
        assert_eq!(rows[0].payment_mode.as_deref(), Some("Stripe"));
        assert_eq!(rows[1].payment_mode.as_deref(), Some("N/A"));
    }

    #[test]
    fn test_enrich_rows_by_invoice_id_only() {
        let payments = vec![CustomerPayment {
            payment_mode: Some("Stripe".into()),
            invoices: vec![PaymentInvoiceRef {
                invoice_id: Some("9001".into()),
                invoice_number: None,
            }],
            ..Default::default()
        }];
        let map = PaymentModeMap::from_payments(&payments);

        let mut rows = vec![InvoiceRow {
            invoice_id: Some("9001".into()),
            invoice_number: "INV-1".into(),
            ..Default::default()
        }];
        enrich_with_payment_modes(&mut rows, &map);
        assert_eq!(rows[0].payment_mode.as_deref(), Some("Stripe"));
    }

    #[test]
    fn test_summarize_payment_modes() {
        let payments = vec![
            payment(Some("Check"), 250.0, None),
            payment(Some("Bank Transfer"), 600.4, None),
            payment(Some("Check"), 150.0, None),
            payment(None, 0.0, None),
            payment(Some("Cash"), -20.0, None),
        ];

        let summary = summarize_payment_modes(&payments);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].payment_mode, "Bank Transfer");
        assert_eq!(summary[0].total, 600);
        assert_eq!(summary[0].percentage, 60);
        assert_eq!(summary[1].payment_mode, "Check");
        assert_eq!(summary[1].total, 400);
        assert_eq!(summary[1].percentage, 40);
    }

    #[test]
    fn test_summary_rounds_halves_to_even() {
        let payments = vec![
            CustomerPayment {
                payment_mode: Some("Check".into()),
                amount: 12.5,
                ..Default::default()
            },
            CustomerPayment {
                payment_mode: Some("Stripe".into()),
                amount: 87.5,
                ..Default::default()
            },
        ];

        let shares = summarize_payment_modes(&payments);
        assert_eq!(shares[0].payment_mode, "Stripe");
        assert_eq!((shares[0].total, shares[0].percentage), (88, 88));
        assert_eq!((shares[1].total, shares[1].percentage), (12, 12));
    }

    #[test]
    fn test_summarize_nothing() {
        assert!(summarize_payment_modes(&[]).is_empty());
    }

    #[test]
    fn test_monthly_trend() {
        let jan = NaiveDate::from_ymd_opt(2025, 1, 15);
        let jan_late = NaiveDate::from_ymd_opt(2025, 1, 31);
        let feb = NaiveDate::from_ymd_opt(2025, 2, 2);
        let payments = vec![
            payment(Some("Check"), 100.0, jan),
            payment(Some("Check"), 50.0, jan_late),
            payment(Some("Stripe"), 70.0, feb),
            payment(Some("Stripe"), 30.0, None),
        ];

        let trend = monthly_collection_trend(&payments);
        assert_eq!(
            trend,
            vec![
                MonthlyCollection {
                    month: "2025-01".into(),
                    payment_mode: "Check".into(),
                    amount: 150.0,
                },
                MonthlyCollection {
                    month: "2025-02".into(),
                    payment_mode: "Stripe".into(),
                    amount: 70.0,
                },
            ]
        );
    }

    #[test]
    fn test_deserialize_api_payment() {
        let json = r#"{
            "payment_id": "460000000042001",
            "customer_name": "Bowman and Co",
            "payment_mode": "cash",
            "amount": "450.00",
            "date": "2024-10-03",
            "invoice_numbers": "INV-00003",
            "invoices": [{"invoice_id": "460000000031001", "invoice_number": "INV-00003"}]
        }"#;
        let payment: CustomerPayment = serde_json::from_str(json).unwrap();
        assert_eq!(payment.amount, 450.0);
        assert_eq!(payment.date, NaiveDate::from_ymd_opt(2024, 10, 3));
        assert_eq!(payment.invoices.len(), 1);
    }

    #[test]
    fn test_write_payment_csv() {
        let payments = vec![CustomerPayment {
            payment_id: "P1".into(),
            customer_name: "Acme".into(),
            payment_mode: Some("Check".into()),
            amount: 20.5,
            date: NaiveDate::from_ymd_opt(2025, 1, 2),
            invoices: vec![PaymentInvoiceRef {
                invoice_id: Some("11".into()),
                invoice_number: Some("INV-11".into()),
            }],
            invoice_numbers: None,
        }];
        let mut buffer = Vec::new();
        write_payment_csv(&mut buffer, &payments, "GoFleet Corporation").unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("P1,Acme,Check,20.5,2025-01-02,INV-11,11,GoFleet Corporation"));
        assert_eq!(
            payment_export_file_name("GoFleet Corporation", NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()),
            "gofleet_corporation_paid_invoice_payments_2025-01-02.csv"
        );
    }
}
