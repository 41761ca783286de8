use std::io::Read;
use std::path::Path;

use tokio::fs;
use zip::ZipArchive;

use super::{crop, target_dimensions, ProcessContext};
use crate::error::ProcessingResult;
use crate::models::ProcessorResult;

/// Candidate thumbnail member paths inside a zip-based container, tried
/// in order.
const ARCHIVE_THUMBNAIL_PATHS: &[&str] = &[
    "Thumbnails/Preview.jpg",
    "Thumbnails/Preview.png",
    "QuickLook/Thumbnail.jpg",
    "QuickLook/Thumbnail.png",
    "QuickLook/Preview.jpg",
    "QuickLook/Preview.png",
    "preview.jpg",
    "preview.png",
    "previews/preview.jpg",
    "previews/preview.png",
];

/// Any unknown format that happens to be a valid zip is searched for a
/// known embedded thumbnail. Returns `Ok(None)` (not an error) when the
/// file isn't a zip at all, or is a zip with none of the known members —
/// the caller then tries the OLE and unknown-text fallbacks in turn.
pub async fn try_extract_thumbnail(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<Option<ProcessorResult>> {
    let bytes = fs::read(input_path).await?;
    let cursor = std::io::Cursor::new(&bytes);
    let mut archive = match ZipArchive::new(cursor) {
        Ok(archive) => archive,
        Err(_) => return Ok(None),
    };

    for candidate in ARCHIVE_THUMBNAIL_PATHS {
        let mut entry = match archive.by_name(candidate) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let mut preview_bytes = Vec::new();
        if entry.read_to_end(&mut preview_bytes).is_err() {
            continue;
        }
        drop(entry);

        let image = match image::load_from_memory(&preview_bytes) {
            Ok(image) => image,
            Err(_) => continue,
        };

        let (target_w, target_h) = target_dimensions(ctx.settings, "");
        let thumbnail =
            crop::cover_crop(&image, target_w, target_h, ctx.settings.thumbnail_crop_position);
        let png_bytes = crop::encode_png(&thumbnail)?;

        let mut result = ProcessorResult::ok("");
        let thumbnail_path = ctx.work_dir.join("thumbnail.png");
        fs::write(&thumbnail_path, &png_bytes).await?;
        result.thumbnail_file = Some("thumbnail.png".to_string());
        return Ok(Some(result));
    }

    Ok(None)
}
