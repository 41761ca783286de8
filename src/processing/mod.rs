pub mod archive;
pub mod cad;
pub mod cad_client;
pub mod crop;
pub mod office;
pub mod ocr_client;
pub mod ole;
pub mod pdf;
pub mod raster;
pub mod svg;
pub mod text;
pub mod video;

use std::path::Path;

use tracing::{info, warn};

use crate::config::ProcessingSettings;
use crate::models::ProcessorResult;

/// Extensions converted to PDF by a headless office suite before being
/// treated as a generated-PDF origin.
const OFFICE_EXTENSIONS: &[&str] = &[
    "xlsx", "xls", "xlsm", "ods", "docx", "doc", "docm", "odt", "pptx", "ppt", "pptm", "odp",
    "pages", "numbers", "key",
];

const RASTER_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "heic", "heif",
];

const CAD_EXTENSIONS: &[&str] = &["dwg", "dxf"];

const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "avi", "webm", "mkv", "m4v"];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "json", "xml", "js", "ts", "css", "html", "md", "csv", "yaml", "yml", "ini", "cfg",
    "conf", "log", "py", "sh", "bash",
];

/// Source extensions whose derived PDF is known to carry accurate embedded
/// text, so the processor skips the OCR comparison entirely.
pub const GENERATED_PDF_SOURCES: &[&str] = &[
    "dwg", "dxf", "xlsx", "xls", "xlsm", "ods", "docx", "doc", "docm", "odt", "pptx", "ppt",
    "pptm", "odp", "pages", "numbers", "key",
];

pub struct ProcessContext<'a> {
    pub work_dir: &'a Path,
    pub settings: &'a ProcessingSettings,
    pub ocr_exchange_dir: &'a Path,
    pub cad_exchange_dir: &'a Path,
    pub ocr_timeout: std::time::Duration,
    pub cad_timeout: std::time::Duration,
}

/// Routes one input file through the type-specific pipeline and
/// assembles the `ProcessorResult` the Orchestrator reads back
/// from `/work/result.json`. An unsupported extension is not an error:
/// it returns `success: true` with both derived fields empty.
pub async fn process_file(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    content_hash: &str,
    original_extension: &str,
) -> ProcessorResult {
    let ext = original_extension.trim_start_matches('.').to_ascii_lowercase();

    let outcome = if RASTER_EXTENSIONS.contains(&ext.as_str()) {
        raster::process(ctx, input_path, &ext).await
    } else if ext == "pdf" {
        pdf::process(ctx, input_path, &ext, true).await
    } else if CAD_EXTENSIONS.contains(&ext.as_str()) {
        cad::process(ctx, input_path, &ext).await
    } else if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
        office::process(ctx, input_path, &ext).await
    } else if ext == "svg" {
        svg::process(ctx, input_path).await
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        video::process(ctx, input_path).await
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        text::read_known_text(ctx, input_path).await
    } else {
        match archive::try_extract_thumbnail(ctx, input_path).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) => match ole::try_extract_bitmap(ctx, input_path).await {
                Ok(Some(found)) => Ok(found),
                Ok(None) => text::try_unknown_text_fallback(ctx, input_path).await,
                Err(err) => {
                    warn!(%err, "ole fallback failed, trying unknown-text fallback");
                    text::try_unknown_text_fallback(ctx, input_path).await
                }
            },
            Err(err) => {
                warn!(%err, "archive fallback failed, trying ole/unknown-text fallback");
                match ole::try_extract_bitmap(ctx, input_path).await {
                    Ok(Some(found)) => Ok(found),
                    _ => text::try_unknown_text_fallback(ctx, input_path).await,
                }
            }
        }
    };

    match outcome {
        Ok(mut result) => {
            result.content_hash = content_hash.to_string();
            if let Some(text) = &mut result.extracted_text {
                truncate_text(text, ctx.settings.max_text_length);
            }
            if result.thumbnail_file.is_none() && result.extracted_text.is_none() {
                info!(%content_hash, "no thumbnail or text generated for this file type");
            }
            result
        }
        Err(err) => {
            warn!(%content_hash, error = %err, "processing failed");
            ProcessorResult::failed(content_hash, err.to_string())
        }
    }
}

pub fn is_small_thumbnail_extension(settings: &ProcessingSettings, ext: &str) -> bool {
    settings
        .thumbnail_small_extensions
        .iter()
        .any(|known| known == ext)
}

pub fn target_dimensions(settings: &ProcessingSettings, ext: &str) -> (u32, u32) {
    if is_small_thumbnail_extension(settings, ext) {
        (settings.thumbnail_width, settings.thumbnail_height)
    } else {
        (settings.thumbnail_large_width, settings.thumbnail_large_height)
    }
}

fn truncate_text(text: &mut String, max_len: usize) {
    text.retain(|c| c != '\0');
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}
