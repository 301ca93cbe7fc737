use anyhow::Context;
use chrono::Local;
use dotenv::dotenv;
use receivables_risk::zoho::{PaymentQuery, ZohoClient, ZohoCredentials};
use receivables_risk::*;
use std::path::PathBuf;

const PAYMENT_MONTHS_BACK: u32 = 6;

/// `ZOHO_ORGANIZATIONS` is `Name=id;Other Name=id`. When unset every
/// organization the token can see is used.
fn organizations_from_env() -> Option<Vec<OrganizationConfig>> {
    let raw = std::env::var("ZOHO_ORGANIZATIONS").ok()?;
    let orgs = raw
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, id)| OrganizationConfig::new(name.trim(), id.trim()))
        .collect();
    Some(orgs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let data_dir = PathBuf::from(std::env::var("RISK_DATA_DIR").unwrap_or_else(|_| "data".into()));
    let credentials = ZohoCredentials::from_env().context("Zoho credentials not configured")?;

    println!("🔑 Refreshing Zoho access token...");
    let client = ZohoClient::connect(&credentials).await?;

    let organizations = match organizations_from_env() {
        Some(orgs) => orgs,
        None => client
            .list_organizations()
            .await?
            .into_iter()
            .map(|org| OrganizationConfig::new(org.name, org.organization_id))
            .collect(),
    };
    println!("🏢 Syncing {} organizations", organizations.len());
    for org in &organizations {
        let total = client.count_invoices(&org.organization_id, None).await?;
        println!("   {}: {} invoices on record", org.name, total);
    }

    let today = Local::now().date_naive();
    let payment_query = PaymentQuery::default().since(date_start_for(today, PAYMENT_MONTHS_BACK)?);

    for (org, mut rows) in client.fetch_overdue_rows(&organizations).await? {
        let payments = client
            .fetch_customer_payments(&org.organization_id, &payment_query)
            .await?;
        enrich_with_payment_modes(&mut rows, &PaymentModeMap::from_payments(&payments));

        let path = export_invoice_csv(&data_dir, &org.name, today, &rows)?;
        println!("📥 {}: {} overdue invoices -> {}", org.name, rows.len(), path.display());

        for share in summarize_payment_modes(&payments) {
            println!("   {:<20} {:>10} ({}%)", share.payment_mode, share.total, share.percentage);
        }
    }

    let config = ScoringConfig::default();
    let rows = load_latest_exports(&data_dir, &organizations)?;
    let records = overdue_records(&rows, config.resolved_evaluation_date());
    let ranked = score_with_verification(&records, &config)?;

    let snapshot = SnapshotStore::new(&data_dir).write_now(&ranked)?;
    println!("📝 Scored {} customers, snapshot at {}", ranked.len(), snapshot.display());

    for summary in ranked.iter().take(10) {
        println!(
            "   {:<32} {:>12.2} {:.3}",
            summary.customer_name, summary.total_overdue_balance, summary.aggregate_risk_score
        );
    }

    Ok(())
}
