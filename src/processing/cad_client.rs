use std::path::Path;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{ProcessingError, ProcessingResult};
use crate::stage::StageDir;

/// Requests a DWG/DXF→PDF conversion via the shared `/cad-exchange`
/// volume: write the input bytes and a `.convert` marker (contents: the
/// input filename), poll for `.done`/`.failed`, read back the PDF, clean
/// up either way.
pub async fn request_conversion(
    exchange_dir: &Path,
    input_bytes: &[u8],
    ext: &str,
    timeout: Duration,
) -> ProcessingResult<Vec<u8>> {
    let exchange = StageDir::new(exchange_dir.to_path_buf());
    let job_id = Uuid::new_v4().to_string()[..12].to_string();
    let input_name = format!("{job_id}.{ext}");

    exchange
        .write_bytes(&job_id, ext, input_bytes)
        .await
        .map_err(|err| ProcessingError::Sidecar(format!("failed to stage cad input: {err}")))?;
    exchange
        .write_text(&job_id, "convert", &input_name)
        .await
        .map_err(|err| ProcessingError::Sidecar(format!("failed to write cad request: {err}")))?;

    let started = Instant::now();
    let result = loop {
        if exchange.exists(&job_id, "done").await {
            let pdf = exchange
                .read_bytes(&job_id, "pdf")
                .await
                .map_err(|err| ProcessingError::Sidecar(format!("missing cad pdf output: {err}")));
            break pdf;
        }
        if exchange.exists(&job_id, "failed").await {
            let error = exchange.read_text(&job_id, "failed").await.unwrap_or_default();
            break Err(ProcessingError::Sidecar(error));
        }
        if started.elapsed() >= timeout {
            break Err(ProcessingError::SidecarTimeout(timeout));
        }
        sleep(Duration::from_millis(500)).await;
    };

    exchange.remove(&job_id, ext).await;
    exchange.remove(&job_id, "convert").await;
    exchange.remove(&job_id, "pdf").await;
    exchange.remove(&job_id, "done").await;
    exchange.remove(&job_id, "failed").await;

    result
}
