use std::env;

use anyhow::{Context, Result};

use pipeline_core::claim;
use pipeline_core::config::MaintenanceConfig;
use pipeline_core::db;
use pipeline_core::init_tracing;

/// Operator CLI for the out-of-core recovery sweep: a job stuck in
/// `indexing` past its lease deadline (a crashed Fetcher download, a
/// killed Orchestrator) is otherwise stuck there forever,
/// since neither capability-restricted role can reclaim it.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("sweep-stuck-indexing") => sweep_stuck_indexing().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance sweep-stuck-indexing");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance sweep-stuck-indexing");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn sweep_stuck_indexing() -> Result<()> {
    let config = MaintenanceConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.database.redacted_database_url(),
        lease_timeout_secs = config.indexing_lease_timeout.as_secs(),
        max_retries = config.max_retries,
        "sweeping jobs stuck in indexing"
    );

    let pool = db::init_pool_with_size(&config.database.database_url, config.database.max_pool_size)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let affected = claim::sweep_stuck_indexing(
        &mut conn,
        config.indexing_lease_timeout.as_secs_f64(),
        config.max_retries as i32,
    )?;

    println!("Reclaimed {affected} job(s) stuck in indexing.");
    Ok(())
}
