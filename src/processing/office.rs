use std::path::Path;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout as with_timeout;

use super::{pdf, ProcessContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::ProcessorResult;

/// Office document path: convert to PDF via a headless office engine,
/// then treat the result exactly like a generated PDF — thumbnail,
/// embedded text, no OCR.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    ext: &str,
) -> ProcessingResult<ProcessorResult> {
    let scratch = TempDir::new()?;

    let mut command = Command::new(&ctx.settings.office_converter_binary);
    command
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(scratch.path())
        .arg(input_path);

    let run = with_timeout(ctx.settings.office_convert_timeout, command.output())
        .await
        .map_err(|_| ProcessingError::SidecarTimeout(ctx.settings.office_convert_timeout))??;

    if !run.status.success() {
        let stderr = String::from_utf8_lossy(&run.stderr).into_owned();
        return Err(ProcessingError::Converter(format!(
            "office conversion failed: {stderr}"
        )));
    }

    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pdf_path = scratch.path().join(format!("{stem}.pdf"));

    pdf::process(ctx, &pdf_path, ext, false).await
}
