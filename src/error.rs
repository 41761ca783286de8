use thiserror::Error;

pub type ClaimResult<T> = Result<T, ClaimError>;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

pub type StageResult<T> = Result<T, StageError>;

/// Failures in the marker-file IPC protocol. These are always retried by
/// the caller's poll loop, never surfaced as a job failure on their own.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed job metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// A processing failure is distinct from an unsupported format: "no
/// thumbnail for this type" is treated as `success: true` with empty
/// fields, never as an error.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("failed to render pdf: {0}")]
    Pdf(String),
    #[error("sidecar request failed: {0}")]
    Sidecar(String),
    #[error("sidecar request timed out after {0:?}")]
    SidecarTimeout(std::time::Duration),
    #[error("external converter failed: {0}")]
    Converter(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("blob store returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid blob url: {0}")]
    Url(#[from] url::ParseError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("container exited with non-zero status {0}")]
    NonZeroExit(i64),
    #[error("container run timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SanitizeResult<T> = Result<T, SanitizeError>;

/// Uploader-side failures. A thumbnail that fails sanitization is treated
/// the same as a missing thumbnail: the job still settles, just without
/// that artifact.
#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("thumbnail exceeds {limit} bytes (got {actual})")]
    TooLarge { limit: u64, actual: u64 },
    #[error("failed to decode thumbnail: {0}")]
    Decode(#[from] image::ImageError),
}

pub type OcrEngineResult<T> = Result<T, OcrEngineError>;

#[derive(Debug, Error)]
pub enum OcrEngineError {
    #[error("failed to load ocr model: {0}")]
    ModelLoad(String),
    #[error("failed to decode ocr input image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("ocr recognition failed: {0}")]
    Recognition(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CadEngineResult<T> = Result<T, CadEngineError>;

#[derive(Debug, Error)]
pub enum CadEngineError {
    #[error("cad converter not found at {0}")]
    ConverterMissing(String),
    #[error("cad conversion timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("cad converter exited with status {0}: {1}")]
    NonZeroExit(i32, String),
    #[error("cad converter produced no pdf output")]
    NoOutput,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
