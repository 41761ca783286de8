use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task;
use tokio::time::sleep;
use tracing::{error, info, warn};

use pipeline_core::config::OcrSidecarConfig;
use pipeline_core::init_tracing;
use pipeline_core::models::OcrRequest;
use pipeline_core::ocr_engine::OcrEngine;
use pipeline_core::stage::StageDir;

/// Long-lived OCR engine: loads its models once, then
/// polls `/ocr-exchange` for `{id}.request` files, serving them strictly
/// serially (the model is not re-entrant).
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = OcrSidecarConfig::from_env()?;
    info!(
        component = "ocr-sidecar",
        exchange_dir = %config.exchange_dir.display(),
        "loading ocr models"
    );

    let engine = Arc::new(
        OcrEngine::load(
            &config.detection_model_path,
            &config.recognition_model_path,
            config.wordlist_path.as_deref(),
        )
        .context("failed to load ocr engine")?,
    );
    info!(component = "ocr-sidecar", "models loaded, entering poll loop");

    let exchange = StageDir::new(config.exchange_dir.clone());
    exchange.ensure_exists().await?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(running.clone());

    while running.load(Ordering::SeqCst) {
        match exchange.list_with_suffix("request").await {
            Ok(job_ids) => {
                for job_id in job_ids {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    handle_request(&exchange, &engine, &job_id).await;
                }
            }
            Err(err) => {
                error!(component = "ocr-sidecar", error = %err, "failed to list requests");
            }
        }
        sleep(config.poll_interval).await;
    }

    info!(component = "ocr-sidecar", "shutdown signal observed, exiting");
    Ok(())
}

async fn handle_request(exchange: &StageDir, engine: &Arc<OcrEngine>, job_id: &str) {
    let request: OcrRequest = match exchange.read_json(job_id, "request").await {
        Ok(request) => request,
        Err(err) => {
            warn!(component = "ocr-sidecar", job_id, error = %err, "malformed request, dropping");
            exchange.remove(job_id, "request").await;
            return;
        }
    };

    let image_path = exchange.root().join(&request.image_path);
    let engine = engine.clone();
    let response = task::spawn_blocking(move || engine.recognize(&image_path)).await;

    match response {
        Ok(Ok(response)) => {
            if let Err(err) = exchange.write_json(job_id, "result", &response).await {
                warn!(component = "ocr-sidecar", job_id, error = %err, "failed to write result");
            }
        }
        Ok(Err(err)) => {
            let _ = exchange.write_text(job_id, "failed", &truncate(&err.to_string(), 500)).await;
        }
        Err(join_err) => {
            let _ = exchange
                .write_text(job_id, "failed", &truncate(&format!("ocr task panicked: {join_err}"), 500))
                .await;
        }
    }

    exchange.remove(job_id, "request").await;
}

fn truncate(s: &str, max: usize) -> String {
    let mut cut = s.len().min(max);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s[..cut].to_string()
}

fn spawn_signal_watcher(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(component = "ocr-sidecar", error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(component = "ocr-sidecar", "received shutdown signal");
        running.store(false, Ordering::SeqCst);
    });
}
