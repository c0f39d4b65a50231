//! ledger-runner: hosts the settlement job over a ledger database.
//!
//! Usage:
//!   ledger-runner --db ledger.db --data-dir ./data
//!   ledger-runner --db ledger.db --interval-secs 30
//!   ledger-runner --db ledger.db --once

use anyhow::Result;
use ledger_core::{
    config::{load_sanctions, LedgerConfig},
    engine::LedgerEngine,
    settlement_subsystem::SettlementScheduler,
    store::LedgerStore,
};
use log::{info, warn};
use std::env;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let once = args.iter().any(|a| a == "--once");
    let db = str_arg(&args, "--db", ":memory:");
    let data_dir = str_arg(&args, "--data-dir", "./data");

    let mut config = match LedgerConfig::load(data_dir) {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}; using built-in defaults");
            LedgerConfig::default()
        }
    };
    config.settlement.interval_secs =
        parse_arg(&args, "--interval-secs", config.settlement.interval_secs).max(1);

    println!("Ledger & Risk Engine: ledger-runner");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!("  interval:  {}s", config.settlement.interval_secs);
    println!();

    let store = Arc::new(LedgerStore::open(db)?);
    store.migrate()?;
    let engine = Arc::new(LedgerEngine::build(store, config));

    match load_sanctions(data_dir) {
        Ok(seeds) => {
            let count = engine.seed_sanctions(&seeds)?;
            info!("loaded {} sanctions entries ({count} total)", seeds.len());
        }
        Err(e) => warn!("sanctions list not loaded: {e}"),
    }

    if once {
        let report = engine.sweep()?;
        let summary = serde_json::json!({
            "swept_at": chrono::Utc::now().to_rfc3339(),
            "report": report,
            "still_pending": engine.pending_transactions()?.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let report = runtime.block_on(async {
        let scheduler = SettlementScheduler::start(engine.clone());
        tokio::signal::ctrl_c().await?;
        info!("interrupt received, stopping settlement");
        Ok::<_, anyhow::Error>(scheduler.shutdown().await?)
    })?;

    println!("Settlement stopped.");
    println!("  settled:  {}", report.settled);
    println!("  failed:   {}", report.failed);
    println!("  skipped:  {}", report.skipped);
    Ok(())
}

fn str_arg<'a>(args: &'a [String], flag: &str, default: &'a str) -> &'a str {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .unwrap_or(default)
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
