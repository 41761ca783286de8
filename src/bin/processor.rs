use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use pipeline_core::config::ProcessorConfig;
use pipeline_core::models::{JobMetadata, ProcessorResult};
use pipeline_core::processing::{self, ProcessContext};

/// Runs once per container invocation: reads
/// `/work/input.{ext}` + `/work/job.json`, writes `/work/result.json` and
/// (on success) `/work/thumbnail.png`. Exit code is 0 iff a result file
/// was written, even when that result carries `success:false`.
#[tokio::main]
async fn main() -> Result<()> {
    let config = ProcessorConfig::from_env()?;
    let _log_guard = init_processor_logging(&config.work_dir);

    info!(component = "processor", work_dir = %config.work_dir.display(), "starting");

    let metadata: JobMetadata = read_job_metadata(&config.work_dir).await?;

    let input_path = find_input_file(&config.work_dir, &metadata.original_extension).await;
    let result = match input_path {
        Some(path) => {
            let ctx = ProcessContext {
                work_dir: &config.work_dir,
                settings: &config.processing,
                ocr_exchange_dir: &config.ocr_exchange_dir,
                cad_exchange_dir: &config.cad_exchange_dir,
                ocr_timeout: config.ocr_timeout,
                cad_timeout: config.cad_timeout,
            };
            processing::process_file(&ctx, &path, &metadata.content_hash, &metadata.original_extension)
                .await
        }
        None => {
            error!(component = "processor", "no input file found under /work");
            ProcessorResult::failed(&metadata.content_hash, "no input file found")
        }
    };

    write_result(&config.work_dir, &result).await?;

    if result.success {
        info!(component = "processor", content_hash = %metadata.content_hash, "processing succeeded");
    } else {
        error!(component = "processor", content_hash = %metadata.content_hash, error = ?result.error, "processing failed");
    }

    Ok(())
}

async fn read_job_metadata(work_dir: &std::path::Path) -> Result<JobMetadata> {
    let path = work_dir.join("job.json");
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let metadata: JobMetadata = serde_json::from_slice(&bytes)
        .with_context(|| format!("malformed job metadata in {}", path.display()))?;
    Ok(metadata)
}

/// The Orchestrator copies the raw input in as `/work/input.{ext}`; this
/// just confirms the expected name is actually there (a mismatched or
/// missing extension is a per-job failure, not a crash).
async fn find_input_file(work_dir: &std::path::Path, ext: &str) -> Option<PathBuf> {
    let named = work_dir.join(format!("input.{ext}"));
    if tokio::fs::metadata(&named).await.is_ok() {
        return Some(named);
    }

    let mut entries = tokio::fs::read_dir(work_dir).await.ok()?;
    while let Some(entry) = entries.next_entry().await.ok()? {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some("input") {
            return Some(path);
        }
    }
    None
}

async fn write_result(work_dir: &std::path::Path, result: &ProcessorResult) -> Result<()> {
    let path = work_dir.join("result.json");
    let bytes = serde_json::to_vec(result)?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Dual-sink logging: stdout for the Orchestrator's
/// container-logs capture, plus a per-job file the Uploader forwards
/// line-by-line to the logging endpoint once the job settles.
fn init_processor_logging(work_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(work_dir, "processor.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(non_blocking.and(std::io::stdout))
        .compact()
        .init();

    guard
}
