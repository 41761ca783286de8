use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tracing::{error, info, warn};

use pipeline_core::cad_engine::CadEngine;
use pipeline_core::config::CadSidecarConfig;
use pipeline_core::init_tracing;
use pipeline_core::stage::StageDir;

/// Long-lived DWG/DXF→PDF converter: polls `/cad-exchange`
/// for `{id}.convert` markers (content: the input filename already staged
/// alongside it), runs the converter, and writes back `{id}.pdf` +
/// `{id}.done` or `{id}.failed`. One conversion at a time, same as the OCR
/// sidecar — the converter process is not meant to be run concurrently
/// against itself.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = CadSidecarConfig::from_env()?;
    info!(
        component = "cad-sidecar",
        exchange_dir = %config.exchange_dir.display(),
        converter_binary = %config.converter_binary.display(),
        "starting"
    );

    let engine = Arc::new(CadEngine::new(config.converter_binary.clone()));
    let exchange = StageDir::new(config.exchange_dir.clone());
    exchange.ensure_exists().await?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(running.clone());

    info!(component = "cad-sidecar", "entering poll loop");
    while running.load(Ordering::SeqCst) {
        match exchange.list_with_suffix("convert").await {
            Ok(job_ids) => {
                for job_id in job_ids {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    handle_request(&exchange, &engine, &job_id, config.convert_timeout).await;
                }
            }
            Err(err) => {
                error!(component = "cad-sidecar", error = %err, "failed to list requests");
            }
        }
        sleep(config.poll_interval).await;
    }

    info!(component = "cad-sidecar", "shutdown signal observed, exiting");
    Ok(())
}

async fn handle_request(
    exchange: &StageDir,
    engine: &Arc<CadEngine>,
    job_id: &str,
    timeout: std::time::Duration,
) {
    let input_name = match exchange.read_text(job_id, "convert").await {
        Ok(name) => name.trim().to_string(),
        Err(err) => {
            warn!(component = "cad-sidecar", job_id, error = %err, "malformed convert request, dropping");
            exchange.remove(job_id, "convert").await;
            return;
        }
    };

    let input_path = exchange.root().join(&input_name);
    let outcome = convert_one(engine, &input_path, timeout).await;

    match outcome {
        Ok(pdf_bytes) => {
            if let Err(err) = exchange.write_bytes(job_id, "pdf", &pdf_bytes).await {
                warn!(component = "cad-sidecar", job_id, error = %err, "failed to write pdf output");
            }
            exchange.touch(job_id, "done").await.ok();
        }
        Err(err) => {
            let _ = exchange.write_text(job_id, "failed", &truncate(&err, 500)).await;
        }
    }

    exchange.remove(job_id, "convert").await;
}

async fn convert_one(
    engine: &Arc<CadEngine>,
    input_path: &std::path::Path,
    timeout: std::time::Duration,
) -> Result<Vec<u8>, String> {
    let scratch = TempDir::new().map_err(|err| format!("failed to create scratch dir: {err}"))?;
    let pdf_path = engine
        .convert(input_path, scratch.path(), timeout)
        .await
        .map_err(|err| err.to_string())?;
    tokio::fs::read(&pdf_path)
        .await
        .map_err(|err| format!("failed to read converted pdf: {err}"))
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
                warn!(component = "cad-sidecar", error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(component = "cad-sidecar", "received shutdown signal");
        running.store(false, Ordering::SeqCst);
    });
}
