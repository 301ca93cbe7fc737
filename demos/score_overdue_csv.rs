use anyhow::Context;
use chrono::Local;
use dotenv::dotenv;
use receivables_risk::*;
use std::path::PathBuf;

// Usage: score_overdue_csv <invoices.csv> [data_dir]
fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let csv_path = PathBuf::from(
        args.next()
            .context("usage: score_overdue_csv <invoices.csv> [data_dir]")?,
    );
    let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "data".to_string()));

    let config = match std::env::var("RISK_CONFIG") {
        Ok(path) => ScoringConfig::from_json(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("reading scoring config {}", path))?,
        Err(_) => ScoringConfig::default(),
    };
    let eval = config.resolved_evaluation_date();

    let rows = read_invoice_csv_file(&csv_path)
        .with_context(|| format!("reading {}", csv_path.display()))?;
    let records = overdue_records(&rows, eval);
    println!("📥 {} invoices read, {} overdue as of {}", rows.len(), records.len(), eval);

    let overview = overdue_overview(&records);
    println!(
        "💰 Total overdue: {:.2} (avg {:.2} per invoice)",
        overview.total_overdue_balance, overview.average_invoice_balance
    );
    println!("⚠️  High-risk invoices: {}", high_risk_invoices(&records, eval).len());

    let ranked = score_with_verification(&records, &config)?;

    let store = SnapshotStore::new(&data_dir);
    let snapshot = store.write(&ranked, Local::now().naive_local())?;
    println!("📝 Snapshot written to {}", snapshot.display());

    let followups = FollowUpStore::in_dir(&data_dir);
    let rows = merge_followups(&ranked, &followups.load()?, DEFAULT_RECOMMENDATION_THRESHOLD);

    println!();
    println!("{:<32} {:>12} {:>8} {:>6} {:>7}  {}", "Customer", "Overdue", "AvgDays", "High", "Score", "Action");
    for row in rows.iter().take(20) {
        let s = &row.summary;
        println!(
            "{:<32} {:>12.2} {:>8.1} {:>6} {:>7.3}  {}{}",
            s.customer_name,
            s.total_overdue_balance,
            s.avg_days_overdue,
            s.high_risk_invoice_count,
            s.aggregate_risk_score,
            row.recommendation.label(),
            if row.note.approached { " (approached)" } else { "" },
        );
    }

    Ok(())
}
