use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout as with_timeout;

use crate::error::{CadEngineError, CadEngineResult};

/// Wraps the CAD→PDF converter binary the CAD Sidecar shells out to.
/// Treated as a black-box CLI tool (an ODA File Converter-style or
/// `qcad dwg2pdf`-style binary), so this wrapper only needs to know the
/// binary path, its auto-fit/auto-orientation flags, and where it drops
/// its output — not which underlying tool it actually is.
pub struct CadEngine {
    converter_binary: PathBuf,
}

impl CadEngine {
    pub fn new(converter_binary: PathBuf) -> Self {
        Self { converter_binary }
    }

    /// Converts `input_path` to a single PDF in `output_dir`, auto-fit and
    /// auto-orientation. Returns the produced PDF's path.
    pub async fn convert(
        &self,
        input_path: &Path,
        output_dir: &Path,
        request_timeout: Duration,
    ) -> CadEngineResult<PathBuf> {
        if tokio::fs::metadata(&self.converter_binary).await.is_err() {
            return Err(CadEngineError::ConverterMissing(
                self.converter_binary.display().to_string(),
            ));
        }

        tokio::fs::create_dir_all(output_dir).await?;

        let mut command = Command::new(&self.converter_binary);
        command
            .arg("-a")
            .arg("-auto-orientation")
            .arg(input_path)
            .arg(output_dir);

        let run = with_timeout(request_timeout, command.output())
            .await
            .map_err(|_| CadEngineError::Timeout(request_timeout))??;

        if !run.status.success() {
            let stderr = String::from_utf8_lossy(&run.stderr).into_owned();
            return Err(CadEngineError::NonZeroExit(
                run.status.code().unwrap_or(-1),
                stderr,
            ));
        }

        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let expected = output_dir.join(format!("{stem}.pdf"));
        if tokio::fs::metadata(&expected).await.is_ok() {
            return Ok(expected);
        }

        // The converter occasionally names its output differently than the
        // input stem; fall back to whatever single PDF landed in the
        // output directory (mirrors `processor.py`'s `glob("*.pdf")` retry).
        let mut entries = tokio::fs::read_dir(output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|ext| ext == "pdf").unwrap_or(false) {
                return Ok(path);
            }
        }

        Err(CadEngineError::NoOutput)
    }
}
