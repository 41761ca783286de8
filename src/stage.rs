use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::{StageError, StageResult};

/// A filesystem mount shared between two adjacent pipeline stages.
///
/// Every cross-process handoff in this system is a file whose *existence*
/// is the signal: `{stem}.{suffix}`. `StageDir` is the one place that
/// touches those paths so every component
/// builds them the same way.
#[derive(Clone, Debug)]
pub struct StageDir {
    root: PathBuf,
}

impl StageDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, stem: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{stem}.{suffix}"))
    }

    pub async fn ensure_exists(&self) -> StageResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| StageError::io(self.root.display().to_string(), err))
    }

    pub async fn exists(&self, stem: &str, suffix: &str) -> bool {
        fs::metadata(self.path(stem, suffix)).await.is_ok()
    }

    /// Lists the stems of every entry ending in `.{suffix}` directly under
    /// this directory, in directory-listing order — requests are
    /// processed in that same order.
    pub async fn list_with_suffix(&self, suffix: &str) -> StageResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| StageError::io(self.root.display().to_string(), err))?;

        let dotted = format!(".{suffix}");
        let mut stems = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StageError::io(self.root.display().to_string(), err))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(&dotted) {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    pub async fn count_with_suffix(&self, suffix: &str) -> StageResult<usize> {
        Ok(self.list_with_suffix(suffix).await?.len())
    }

    pub async fn write_bytes(&self, stem: &str, suffix: &str, bytes: &[u8]) -> StageResult<()> {
        let path = self.path(stem, suffix);
        fs::write(&path, bytes)
            .await
            .map_err(|err| StageError::io(path.display().to_string(), err))
    }

    pub async fn write_text(&self, stem: &str, suffix: &str, text: &str) -> StageResult<()> {
        self.write_bytes(stem, suffix, text.as_bytes()).await
    }

    pub async fn write_json<T: Serialize>(
        &self,
        stem: &str,
        suffix: &str,
        value: &T,
    ) -> StageResult<()> {
        let body = serde_json::to_vec(value)?;
        self.write_bytes(stem, suffix, &body).await
    }

    /// Creates an empty marker — the `.ready`/`.done`/`.convert` family,
    /// whose content is never read, only its existence.
    pub async fn touch(&self, stem: &str, suffix: &str) -> StageResult<()> {
        self.write_bytes(stem, suffix, b"").await
    }

    pub async fn read_bytes(&self, stem: &str, suffix: &str) -> StageResult<Vec<u8>> {
        let path = self.path(stem, suffix);
        fs::read(&path)
            .await
            .map_err(|err| StageError::io(path.display().to_string(), err))
    }

    pub async fn read_text(&self, stem: &str, suffix: &str) -> StageResult<String> {
        let path = self.path(stem, suffix);
        fs::read_to_string(&path)
            .await
            .map_err(|err| StageError::io(path.display().to_string(), err))
    }

    pub async fn read_json<T: DeserializeOwned>(&self, stem: &str, suffix: &str) -> StageResult<T> {
        let bytes = self.read_bytes(stem, suffix).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Removes a marker if present; a missing marker is not an error (the
    /// equivalent of Python's `unlink(missing_ok=True)` used throughout
    /// the original orchestrator/uploader cleanup paths).
    pub async fn remove(&self, stem: &str, suffix: &str) {
        let path = self.path(stem, suffix);
        let _ = fs::remove_file(path).await;
    }

    /// Removes every `{stem}.*` entry, used by the Uploader once a job is
    /// fully settled and by the Orchestrator's CAD-exchange sweep keyed on
    /// a hash prefix.
    pub async fn remove_all_with_stem_prefix(&self, prefix: &str) -> StageResult<()> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| StageError::io(self.root.display().to_string(), err))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StageError::io(self.root.display().to_string(), err))?
        {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(prefix) {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}
