use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::file_contents;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_INDEXING: &str = "indexing";
pub const STATUS_DONE: &str = "done";
pub const STATUS_ERROR: &str = "error";

/// A row of `file_contents`, keyed by `content_hash`. Mirrors the table the
/// fetcher and uploader roles are each granted a narrow slice of.
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = file_contents)]
#[diesel(primary_key(content_hash))]
pub struct FileContent {
    pub content_hash: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub full_path: String,
    pub try_count: i32,
    pub processing_status: String,
    pub s3_status: String,
    pub thumbnail_path: Option<String>,
    pub thumbnail_generated_at: Option<DateTime<Utc>>,
    pub extracted_text: Option<String>,
    pub last_status_change: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub db_updated_at: DateTime<Utc>,
}

/// One row returned by `claim_pending_file_content(n)`. The fetcher role
/// has EXECUTE on the procedure and nothing else, so this is a
/// `QueryableByName` mapped straight off the function's `RETURNS TABLE`,
/// not a query against the `file_contents` table itself.
#[derive(Debug, Clone, QueryableByName)]
pub struct ClaimedJob {
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub content_hash: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub storage_path: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub size_bytes: i64,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub try_count: i32,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub full_path: String,
}

/// `{hash}.json` on the input stage volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub content_hash: String,
    pub storage_path: String,
    pub original_filename: String,
    pub original_extension: String,
    pub try_count: i32,
}

/// `/work/result.json`, written by the Format Processor and read back by
/// the Orchestrator once the container exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorResult {
    pub content_hash: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessorResult {
    pub fn ok(content_hash: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            success: true,
            thumbnail_file: None,
            extracted_text: None,
            error: None,
        }
    }

    pub fn failed(content_hash: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            success: false,
            thumbnail_file: None,
            extracted_text: None,
            error: Some(error.into()),
        }
    }
}

/// `{hash}.done` payload dropped by the Orchestrator in the status volume.
/// The processor container can exit 0 while still reporting a per-file
/// failure (`result.json`'s `success: false`, a recognized bad-input case
/// rather than an environmental one) — `try_count` travels alongside for
/// the same reason it does on `FailedMarker`: the uploader role has no
/// SELECT grant to look the current count up itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneMarker {
    pub content_hash: String,
    pub result_file: String,
    pub thumbnail_file: Option<String>,
    pub log_file: Option<String>,
    pub try_count: i32,
}

/// `{hash}.failed` payload dropped by the Orchestrator. Carries the
/// `try_count` the Orchestrator read out of `{hash}.json` at job start,
/// since the uploader role has no SELECT grant on `file_contents` and so
/// cannot look the current count up itself — the retry decision has to
/// travel through the file, not through the DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMarker {
    pub content_hash: String,
    pub error: String,
    pub try_count: i32,
}

/// OCR sidecar request/response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRequest {
    pub job_id: String,
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResponse {
    pub text: String,
    pub confidence: f32,
    pub quality: f32,
    pub word_count: usize,
    pub char_count: usize,
}

/// CAD sidecar request is the bare input filename written as the
/// `.convert` marker's content; the response is file-existence only, so
/// there is no corresponding struct.
