use crate::error::{ReceivablesError, Result};
use crate::schema::{OrganizationConfig, OverdueInvoiceRecord};
use crate::snapshot::latest_with_prefix;
use crate::utils::{
    deserialize_flag, deserialize_lenient_amount, deserialize_lenient_date, normalize_header,
    organization_slug,
};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const INVOICE_EXPORT_COLUMNS: [&str; 8] = [
    "invoice_number",
    "customer_name",
    "due_date",
    "total",
    "balance",
    "status",
    "is_emailed",
    "organization",
];

/// One invoice row as exported to (and read back from) CSV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InvoiceRow {
    /// Accounting-system id; not part of the CSV export.
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub invoice_number: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    pub total: f64,
    #[serde(
        default,
        alias = "amount_due",
        deserialize_with = "deserialize_lenient_amount"
    )]
    pub balance: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_emailed: bool,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub payment_mode: Option<String>,
}

impl InvoiceRow {
    /// Past due with something still owed.
    pub fn is_overdue(&self, evaluation_date: NaiveDate) -> bool {
        matches!(self.due_date, Some(due) if due < evaluation_date) && self.balance != 0.0
    }

    pub fn to_record(&self) -> Option<OverdueInvoiceRecord> {
        let due_date = self.due_date?;
        let mut record = OverdueInvoiceRecord::new(self.customer_name.clone(), self.balance, due_date);
        if !self.invoice_number.is_empty() {
            record.invoice_number = Some(self.invoice_number.clone());
        }
        Some(record)
    }
}

/// Reads an invoice CSV. Headers are normalized (trimmed, lowercased, spaces
/// to `_`), so both `customer_name` and `Customer Name` work.
pub fn read_invoice_csv<R: Read>(reader: R) -> Result<Vec<InvoiceRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv::StringRecord::from(
        csv_reader
            .headers()?
            .iter()
            .map(normalize_header)
            .collect::<Vec<_>>(),
    );

    for required in ["customer_name", "due_date"] {
        if !headers.iter().any(|h| h == required) {
            return Err(ReceivablesError::MissingColumn(required.to_string()));
        }
    }
    if !headers.iter().any(|h| h == "balance" || h == "amount_due") {
        return Err(ReceivablesError::MissingColumn("balance".to_string()));
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        let row: InvoiceRow = record.deserialize(Some(&headers))?;
        rows.push(row);
    }

    debug!("Read {} invoice rows from CSV", rows.len());
    Ok(rows)
}

pub fn read_invoice_csv_file(path: &Path) -> Result<Vec<InvoiceRow>> {
    read_invoice_csv(File::open(path)?)
}

/// Writes invoice rows with the standard export columns. A trailing
/// `payment_mode` column is added when any row carries one.
pub fn write_invoice_csv<W: Write>(writer: W, rows: &[InvoiceRow]) -> Result<()> {
    let with_payment_mode = rows.iter().any(|r| r.payment_mode.is_some());
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = INVOICE_EXPORT_COLUMNS.to_vec();
    if with_payment_mode {
        header.push("payment_mode");
    }
    csv_writer.write_record(&header)?;

    for row in rows {
        let mut fields = vec![
            row.invoice_number.clone(),
            row.customer_name.clone(),
            row.due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            row.total.to_string(),
            row.balance.to_string(),
            row.status.clone(),
            row.is_emailed.to_string(),
            row.organization.clone(),
        ];
        if with_payment_mode {
            fields.push(row.payment_mode.clone().unwrap_or_else(|| "N/A".to_string()));
        }
        csv_writer.write_record(&fields)?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn invoice_export_file_name(organization_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_overdue_invoices_{}.csv",
        organization_slug(organization_name),
        date.format("%Y-%m-%d")
    )
}

/// Writes `{org_slug}_overdue_invoices_{date}.csv` into `dir` and returns its path.
pub fn export_invoice_csv(
    dir: &Path,
    organization_name: &str,
    date: NaiveDate,
    rows: &[InvoiceRow],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(invoice_export_file_name(organization_name, date));
    write_invoice_csv(File::create(&path)?, rows)?;
    info!("Saved {} invoices to {}", rows.len(), path.display());
    Ok(path)
}

/// Most recent export for an organization, by the date in its file name.
pub fn latest_invoice_export(dir: &Path, organization_name: &str) -> Result<Option<PathBuf>> {
    let prefix = format!("{}_overdue_invoices_", organization_slug(organization_name));
    latest_with_prefix(dir, &prefix, ".csv")
}

/// Loads the latest export of every organization and tags each row with the
/// organization's name. Organizations without an export are skipped.
pub fn load_latest_exports(
    dir: &Path,
    organizations: &[OrganizationConfig],
) -> Result<Vec<InvoiceRow>> {
    let mut combined = Vec::new();

    for org in organizations {
        let Some(path) = latest_invoice_export(dir, &org.name)? else {
            warn!("No invoice export found for {}", org.name);
            continue;
        };

        let mut rows = read_invoice_csv_file(&path)?;
        for row in &mut rows {
            row.organization = org.name.clone();
        }
        info!("Loaded {} invoices for {} from {}", rows.len(), org.name, path.display());
        combined.extend(rows);
    }

    Ok(combined)
}

/// Converts rows into scorer input, keeping only invoices overdue as of
/// `evaluation_date`. Rows without a usable due date are dropped with a warning;
/// balance validity is left to the scorer.
pub fn overdue_records(rows: &[InvoiceRow], evaluation_date: NaiveDate) -> Vec<OverdueInvoiceRecord> {
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        if row.due_date.is_none() {
            warn!(
                "Invoice '{}' for '{}' has no usable due date, skipping",
                row.invoice_number, row.customer_name
            );
            continue;
        }
        if !row.is_overdue(evaluation_date) {
            continue;
        }
        if let Some(record) = row.to_record() {
            records.push(record);
        }
    }

    debug!(
        "{} of {} invoice rows are overdue as of {}",
        records.len(),
        rows.len(),
        evaluation_date
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_read_standard_export() {
        let csv = "invoice_number,customer_name,due_date,total,balance,status,is_emailed,organization\n\
                   INV-1,Acme Co,2024-01-15,1200,800.5,overdue,True,GoFleet Corporation\n\
                   INV-2,Beta LLC,,300,300,overdue,False,GoFleet Corporation\n";

        let rows = read_invoice_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].invoice_number, "INV-1");
        assert_eq!(rows[0].due_date, Some(date(2024, 1, 15)));
        assert_eq!(rows[0].balance, 800.5);
        assert!(rows[0].is_emailed);
        assert_eq!(rows[1].due_date, None);
        assert!(!rows[1].is_emailed);
    }

    #[test]
    fn test_read_legacy_headers() {
        let csv = "Invoice Number,Customer Name,Due Date,Amount Due,Status\n\
                   INV-9, Gamma Inc ,2023-11-30,\"1,500.00\",overdue\n";

        let rows = read_invoice_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name, "Gamma Inc");
        assert_eq!(rows[0].balance, 1500.0);
        assert_eq!(rows[0].status, "overdue");
    }

    #[test]
    fn test_missing_balance_column_is_an_error() {
        let csv = "customer_name,due_date\nAcme,2024-01-01\n";
        let err = read_invoice_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ReceivablesError::MissingColumn(ref c) if c == "balance"));
    }

    #[test]
    fn test_overdue_records_filters_rows() {
        let eval = date(2024, 6, 30);
        let rows = vec![
            InvoiceRow {
                invoice_number: "INV-1".into(),
                customer_name: "Acme".into(),
                due_date: Some(date(2024, 5, 1)),
                balance: 100.0,
                ..Default::default()
            },
            InvoiceRow {
                customer_name: "Paid Off".into(),
                due_date: Some(date(2024, 5, 1)),
                balance: 0.0,
                ..Default::default()
            },
            InvoiceRow {
                customer_name: "Not Yet Due".into(),
                due_date: Some(date(2024, 7, 15)),
                balance: 50.0,
                ..Default::default()
            },
            InvoiceRow {
                customer_name: "No Date".into(),
                due_date: None,
                balance: 50.0,
                ..Default::default()
            },
        ];

        let records = overdue_records(&rows, eval);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].customer_name, "Acme");
        assert_eq!(records[0].invoice_number.as_deref(), Some("INV-1"));
    }

    #[test]
    fn test_write_then_read_keeps_payment_mode_column() {
        let rows = vec![InvoiceRow {
            invoice_id: None,
            invoice_number: "INV-1".into(),
            customer_name: "Acme".into(),
            due_date: Some(date(2024, 2, 1)),
            total: 10.0,
            balance: 5.0,
            status: "overdue".into(),
            is_emailed: true,
            organization: "Zenduit Corporation".into(),
            payment_mode: Some("Check".into()),
        }];

        let mut buffer = Vec::new();
        write_invoice_csv(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with(
            "invoice_number,customer_name,due_date,total,balance,status,is_emailed,organization,payment_mode"
        ));

        let read_back = read_invoice_csv(buffer.as_slice()).unwrap();
        assert_eq!(read_back, rows);
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(
            invoice_export_file_name("Zenduit Corporation", date(2025, 3, 9)),
            "zenduit_corporation_overdue_invoices_2025-03-09.csv"
        );
    }

    #[test]
    fn test_load_latest_exports_tags_organization() {
        let dir = tempfile::tempdir().unwrap();
        let old = vec![InvoiceRow {
            customer_name: "Old".into(),
            due_date: Some(date(2024, 1, 1)),
            balance: 1.0,
            ..Default::default()
        }];
        let new = vec![InvoiceRow {
            customer_name: "New".into(),
            due_date: Some(date(2024, 2, 1)),
            balance: 2.0,
            ..Default::default()
        }];
        export_invoice_csv(dir.path(), "GoFleet Corporation", date(2024, 3, 1), &old).unwrap();
        export_invoice_csv(dir.path(), "GoFleet Corporation", date(2024, 3, 2), &new).unwrap();

        let orgs = vec![
            OrganizationConfig::new("GoFleet Corporation", "1"),
            OrganizationConfig::new("Zenduit Corporation", "2"),
        ];
        let rows = load_latest_exports(dir.path(), &orgs).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name, "New");
        assert_eq!(rows[0].organization, "GoFleet Corporation");
    }
}
