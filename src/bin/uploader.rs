use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task;
use tokio::time::sleep;
use tracing::{error, info, warn};

use pipeline_core::blobstore::BlobStoreClient;
use pipeline_core::claim;
use pipeline_core::config::UploaderConfig;
use pipeline_core::db::{self, PgPool};
use pipeline_core::init_tracing;
use pipeline_core::logship::LogShipper;
use pipeline_core::models::{DoneMarker, FailedMarker, ProcessorResult};
use pipeline_core::sanitize::{sanitize_text, sanitize_thumbnail};
use pipeline_core::stage::StageDir;

const THUMBNAIL_BUCKET: &str = "thumbnails";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = UploaderConfig::from_env()?;
    info!(
        component = "uploader",
        database_url = %config.database.redacted_database_url(),
        output_dir = %config.output_dir.display(),
        status_dir = %config.status_dir.display(),
        "loaded uploader configuration"
    );

    let pool = db::init_pool_with_size(&config.database.database_url, config.database.max_pool_size)?;
    let blob = BlobStoreClient::new(config.blob_base_url.clone(), config.blob_token.clone());
    let logs = LogShipper::new(config.logging_endpoint.clone());

    let output = StageDir::new(config.output_dir.clone());
    let status = StageDir::new(config.status_dir.clone());
    for dir in [&output, &status] {
        dir.ensure_exists().await?;
    }

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(running.clone());

    info!(component = "uploader", "entering poll loop");
    while running.load(Ordering::SeqCst) {
        if let Err(err) = tick(&pool, &blob, &logs, &output, &status, &config).await {
            error!(component = "uploader", error = %err, "uploader tick failed, retrying next interval");
        }
        sleep(config.poll_interval).await;
    }

    info!(component = "uploader", "shutdown signal observed, exiting");
    Ok(())
}

async fn tick(
    pool: &PgPool,
    blob: &BlobStoreClient,
    logs: &LogShipper,
    output: &StageDir,
    status: &StageDir,
    config: &UploaderConfig,
) -> Result<()> {
    for hash in status.list_with_suffix("done").await? {
        if let Err(err) = handle_done(pool, blob, logs, output, status, &hash, config).await {
            error!(component = "uploader", content_hash = %hash, error = %err, "failed to settle done job");
        }
    }
    for hash in status.list_with_suffix("failed").await? {
        if let Err(err) = handle_failed(pool, output, status, &hash, config).await {
            error!(component = "uploader", content_hash = %hash, error = %err, "failed to settle failed job");
        }
    }
    Ok(())
}

/// Settles a `{hash}.done` marker: ships the processor log, sanitizes and
/// uploads the thumbnail, sanitizes the extracted text, updates the DB
/// row, and deletes every `{hash}.*` output artifact regardless of how
/// the settlement turned out.
async fn handle_done(
    pool: &PgPool,
    blob: &BlobStoreClient,
    logs: &LogShipper,
    output: &StageDir,
    status: &StageDir,
    hash: &str,
    config: &UploaderConfig,
) -> Result<()> {
    info!(component = "uploader", content_hash = %hash, "settling done job");

    if let Ok(log_text) = output.read_text(hash, "log").await {
        logs.ship(hash, &log_text).await;
    }

    let try_count = status
        .read_json::<DoneMarker>(hash, "done")
        .await
        .map(|marker| marker.try_count)
        .unwrap_or(0);

    let result: ProcessorResult = match output.read_json(hash, "result.json").await {
        Ok(result) => result,
        Err(err) => {
            warn!(component = "uploader", content_hash = %hash, error = %err, "unreadable result.json, treating as failure");
            let message = format!("unreadable result.json: {err}");
            settle_as_failed(pool, hash, try_count, config.max_retries, &message).await?;
            return cleanup(output, status, hash, "done").await;
        }
    };

    if !result.success {
        let error = result.error.unwrap_or_else(|| "processing reported failure".to_string());
        settle_as_failed(pool, hash, try_count, config.max_retries, &error).await?;
        return cleanup(output, status, hash, "done").await;
    }

    let thumbnail_path = match &result.thumbnail_file {
        Some(_) => match upload_thumbnail(blob, output, hash).await {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(component = "uploader", content_hash = %hash, error = %err, "thumbnail sanitization/upload failed, settling without a thumbnail");
                None
            }
        },
        None => None,
    };

    let extracted_text = result
        .extracted_text
        .as_deref()
        .map(|text| sanitize_text(text, config.max_text_length));

    let pool = pool.clone();
    let hash_owned = hash.to_string();
    let thumb = thumbnail_path.clone();
    let text = extracted_text.clone();
    task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        claim::mark_done(&mut conn, &hash_owned, thumb.as_deref(), text.as_deref())
    })
    .await
    .context("mark_done task panicked")??;

    info!(
        component = "uploader",
        content_hash = %hash,
        thumbnail = thumbnail_path.is_some(),
        text = extracted_text.is_some(),
        "job settled as done"
    );

    cleanup(output, status, hash, "done").await
}

async fn upload_thumbnail(blob: &BlobStoreClient, output: &StageDir, hash: &str) -> Result<String> {
    let raw = output.read_bytes(hash, "thumbnail.png").await?;
    let clean = sanitize_thumbnail(&raw)?;
    let key = format!("{hash}.png");
    blob.put(THUMBNAIL_BUCKET, &key, clean, "image/png").await?;
    Ok(key)
}

/// Settles a `{hash}.failed` marker: bump `try_count`, transition to
/// `error` once `MAX_RETRIES` is reached, otherwise back to `pending` for
/// the Fetcher to pick up again.
async fn handle_failed(
    pool: &PgPool,
    output: &StageDir,
    status: &StageDir,
    hash: &str,
    config: &UploaderConfig,
) -> Result<()> {
    let marker = status.read_json::<FailedMarker>(hash, "failed").await;
    let (error, try_count) = match marker {
        Ok(marker) => (marker.error, marker.try_count),
        Err(_) => {
            let text = status.read_text(hash, "failed").await.unwrap_or_default();
            (text, 0)
        }
    };

    warn!(component = "uploader", content_hash = %hash, try_count, error = %error, "settling failed job");

    settle_as_failed(pool, hash, try_count, config.max_retries, &error).await?;
    cleanup(output, status, hash, "failed").await
}

async fn settle_as_failed(
    pool: &PgPool,
    hash: &str,
    try_count: i32,
    max_retries: u32,
    error: &str,
) -> Result<()> {
    let pool = pool.clone();
    let hash_owned = hash.to_string();
    task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        claim::mark_retry_or_error(&mut conn, &hash_owned, try_count, max_retries as i32)
    })
    .await
    .context("mark_retry_or_error task panicked")??;
    tracing::debug!(component = "uploader", content_hash = %hash, error, "job marked for retry/error");
    Ok(())
}

/// Every `{hash}.*` artifact in the output volume, plus the `{hash}.done`
/// or `{hash}.failed` status marker that triggered this settlement.
/// Awaited directly so the marker is gone before the next tick lists the
/// status volume again.
async fn cleanup(output: &StageDir, status: &StageDir, hash: &str, marker_suffix: &str) -> Result<()> {
    output.remove_all_with_stem_prefix(hash).await?;
    status.remove(hash, marker_suffix).await;
    Ok(())
}

fn spawn_signal_watcher(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(component = "uploader", error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(component = "uploader", "received shutdown signal");
        running.store(false, Ordering::SeqCst);
    });
}
