use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task;
use tokio::time::sleep;
use tracing::{error, info, warn};

use pipeline_core::blobstore::BlobStoreClient;
use pipeline_core::claim;
use pipeline_core::config::FetcherConfig;
use pipeline_core::db::{self, PgPool};
use pipeline_core::init_tracing;
use pipeline_core::models::{ClaimedJob, JobMetadata};
use pipeline_core::stage::StageDir;

const SOURCE_BUCKET: &str = "files";
const MAX_OUTSTANDING_READY: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = FetcherConfig::from_env()?;
    info!(
        component = "fetcher",
        database_url = %config.database.redacted_database_url(),
        input_dir = %config.input_dir.display(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "loaded fetcher configuration"
    );

    let pool = db::init_pool_with_size(&config.database.database_url, config.database.max_pool_size)?;
    let blob = BlobStoreClient::new(config.blob_base_url.clone(), config.blob_token.clone());
    let input = StageDir::new(config.input_dir.clone());
    input.ensure_exists().await.context("failed to create input stage volume")?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(running.clone());

    info!(component = "fetcher", "entering poll loop");
    while running.load(Ordering::SeqCst) {
        if let Err(err) = tick(&pool, &blob, &input, &config).await {
            error!(component = "fetcher", error = %err, "fetcher tick failed, retrying next interval");
        }
        sleep(config.poll_interval).await;
    }

    info!(component = "fetcher", "shutdown signal observed, exiting");
    Ok(())
}

async fn tick(
    pool: &PgPool,
    blob: &BlobStoreClient,
    input: &StageDir,
    config: &FetcherConfig,
) -> Result<()> {
    let outstanding = input.count_with_suffix("ready").await?;
    if outstanding >= MAX_OUTSTANDING_READY {
        info!(component = "fetcher", outstanding, "backpressure: skipping claim this tick");
        return Ok(());
    }

    let pool = pool.clone();
    let batch_size = config.claim_batch_size;
    let claimed: Vec<ClaimedJob> = task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        claim::claim_pending(&mut conn, batch_size)
    })
    .await
    .context("claim task panicked")??;

    if claimed.is_empty() {
        return Ok(());
    }
    info!(component = "fetcher", count = claimed.len(), "claimed jobs");

    for job in claimed {
        if let Err(err) = download_one(blob, input, &job).await {
            // The fetcher role has no permission to mark a job failed; an
            // interrupted download just leaves the row in `indexing`,
            // recoverable by the timeout sweep.
            warn!(
                component = "fetcher",
                content_hash = %job.content_hash,
                error = %err,
                "download failed, job remains in indexing for the timeout sweep"
            );
        }
    }

    Ok(())
}

async fn download_one(blob: &BlobStoreClient, input: &StageDir, job: &ClaimedJob) -> Result<()> {
    let bytes = blob.get(SOURCE_BUCKET, &job.storage_path).await?;

    let original_extension = std::path::Path::new(&job.full_path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let metadata = JobMetadata {
        content_hash: job.content_hash.clone(),
        storage_path: job.storage_path.clone(),
        original_filename: job.full_path.clone(),
        original_extension,
        try_count: job.try_count,
    };

    // Write order matters: `.ready` is the atomicity boundary the
    // Orchestrator waits on.
    input.write_bytes(&job.content_hash, "bin", &bytes).await?;
    input.write_json(&job.content_hash, "json", &metadata).await?;
    input.touch(&job.content_hash, "ready").await?;

    info!(component = "fetcher", content_hash = %job.content_hash, size = bytes.len(), "staged job");
    Ok(())
}

fn spawn_signal_watcher(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(component = "fetcher", error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(component = "fetcher", "received shutdown signal");
        running.store(false, Ordering::SeqCst);
    });
}
