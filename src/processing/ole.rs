use std::io::Read;
use std::path::Path;

use tokio::fs;

use super::{crop, target_dimensions, ProcessContext};
use crate::error::ProcessingResult;
use crate::models::ProcessorResult;

/// Legacy compound-document fallback: a `.doc`/`.xls`-style OLE2 container
/// sometimes carries a `BITMAP` stream
/// whose contents are a raw Windows bitmap (`BM` magic). Returns `Ok(None)`
/// — not an error — whenever the file isn't a compound document or has no
/// such stream, so the caller falls through to the unknown-text fallback.
pub async fn try_extract_bitmap(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<Option<ProcessorResult>> {
    let bytes = fs::read(input_path).await?;
    let cursor = std::io::Cursor::new(&bytes);
    let mut compound = match cfb::CompoundFile::open(cursor) {
        Ok(compound) => compound,
        Err(_) => return Ok(None),
    };

    let stream_path = match find_bitmap_stream(&mut compound) {
        Some(path) => path,
        None => return Ok(None),
    };

    let mut stream = match compound.open_stream(&stream_path) {
        Ok(stream) => stream,
        Err(_) => return Ok(None),
    };

    let mut bitmap_bytes = Vec::new();
    if stream.read_to_end(&mut bitmap_bytes).is_err() || !bitmap_bytes.starts_with(b"BM") {
        return Ok(None);
    }

    let image = match image::load_from_memory_with_format(&bitmap_bytes, image::ImageFormat::Bmp) {
        Ok(image) => image,
        Err(_) => return Ok(None),
    };

    let (target_w, target_h) = target_dimensions(ctx.settings, "");
    let thumbnail = crop::cover_crop(&image, target_w, target_h, ctx.settings.thumbnail_crop_position);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");
    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());
    Ok(Some(result))
}

/// Finds any stream in the compound file whose name ends in `BITMAP`
/// (legacy Office thumbnail streams are sometimes nested inside a storage,
/// e.g. `\x05SummaryInformation`-adjacent `BITMAP` under a picture
/// storage), returning its full path.
fn find_bitmap_stream<F>(compound: &mut cfb::CompoundFile<F>) -> Option<std::path::PathBuf>
where
    F: Read + std::io::Seek,
{
    let entries: Vec<std::path::PathBuf> = compound
        .walk()
        .filter(|entry| entry.is_stream())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    entries.into_iter().find(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with("BITMAP"))
            .unwrap_or(false)
    })
}
