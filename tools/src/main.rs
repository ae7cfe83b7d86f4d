//! recon-runner: one scheduled short-delivery reconciliation run.
//!
//! Usage:
//!   recon-runner --config recon.json
//!   recon-runner --config recon.json --date 2026-10-16 --db recon.db --outbox out.jsonl
//!   recon-runner --config recon.json --skip-notify

use anyhow::Result;
use chrono::{Local, NaiveDate};
use shortage_core::{
    config::PipelineConfig,
    engine::{ReconciliationEngine, RunReport, RunStatus},
    locator::LocalDirSource,
    notify::{LogTransport, NotificationTransport, OutboxTransport, ShortageNotifier},
    store::ShortageStore,
    types::{business_date_for, date_key},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = arg_value(&args, "--config").unwrap_or("./recon.json");
    let skip_notify = args.iter().any(|a| a == "--skip-notify");
    let mut config = PipelineConfig::load(config_path)?;
    if let Some(db) = arg_value(&args, "--db") {
        config.database.path = db.to_string();
    }

    let business_date = match arg_value(&args, "--date") {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Bad --date '{d}': {e}"))?,
        None => business_date_for(Local::now().date_naive()),
    };

    println!("Short-delivery reconciliation");
    println!("  config:        {config_path}");
    println!("  db:            {}", config.database.path);
    println!("  business date: {}", date_key(business_date));
    println!();

    // Store and remote source live for exactly this run.
    let store = ShortageStore::open(&config.database.path)?;
    store.migrate()?;

    let engine = ReconciliationEngine::new(&store, LocalDirSource, &config)?;
    let report = engine.run(business_date);
    print_report(&report);

    if report.is_done() && !skip_notify {
        let rows = store.find_positive_shortages(&date_key(business_date))?;
        let notified = match arg_value(&args, "--outbox") {
            Some(path) => notify(&store, OutboxTransport::new(path), &config, &rows)?,
            None => notify(&store, LogTransport, &config, &rows)?,
        };
        println!("  notified:      {notified} of {} shortaged rows", rows.len());
    }

    if report.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn notify<T: NotificationTransport>(
    store: &ShortageStore,
    transport: T,
    config: &PipelineConfig,
    rows: &[shortage_core::store::ShortageRecord],
) -> Result<usize> {
    let notifier = ShortageNotifier::new(
        store,
        transport,
        config.notification.clone(),
        config.ingest.client_tag,
    );
    Ok(notifier.dispatch(rows)?)
}

fn print_report(report: &RunReport) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", report.run_id);
    for outcome in &report.outcomes {
        println!("  {:<22} {}", outcome.stage.as_str(), outcome.message);
    }
    match &report.status {
        RunStatus::Done => println!("  status:        done"),
        RunStatus::SkippedMissingFile { stage } => {
            println!("  status:        skipped ({stage}: file not available yet)")
        }
        RunStatus::Failed { stage, cause } => {
            println!("  status:        failed at {stage}: {cause}")
        }
    }
    for m in &report.mismatches {
        println!(
            "  mismatch {} client={} settlement={} received={} total={} short={}",
            m.security_symbol,
            m.client_id.as_deref().unwrap_or("-"),
            m.settlement_no,
            m.quantity_received_t1,
            m.total_quantity,
            m.short_quantity
        );
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
