use std::path::Path;

use image::DynamicImage;
use tokio::fs;

use super::{crop, ocr_client, target_dimensions, ProcessContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::ProcessorResult;

/// Raster image path: decode, cover-crop, resize, save PNG; then OCR the
/// thumbnail-sized render for text.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    ext: &str,
) -> ProcessingResult<ProcessorResult> {
    let bytes = fs::read(input_path).await?;
    let image = decode(&bytes, ext)?;

    let (target_w, target_h) = target_dimensions(ctx.settings, ext);
    let thumbnail = crop::cover_crop(&image, target_w, target_h, ctx.settings.thumbnail_crop_position);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");

    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());

    match ocr_client::request_ocr(ctx.ocr_exchange_dir, &png_bytes, ctx.ocr_timeout).await {
        Ok(ocr) => {
            // Rasters have no embedded text, so the policy sees eLen=0:
            // it only accepts OCR once oLen > 50 (reason
            // "no_embedded_ocr_found_text"), otherwise yields empty.
            let (use_ocr, reason) = ocr_client::should_use_ocr("", &ocr.text, ocr.quality);
            if use_ocr {
                let text = ocr_client::final_text("", &ocr.text, reason);
                if !text.trim().is_empty() {
                    result.extracted_text = Some(text);
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "ocr request failed for raster image, continuing without text");
        }
    }

    Ok(result)
}

/// Decodes raster bytes into an RGB-capable `DynamicImage`. HEIC/HEIF has
/// no decoder in the `image` crate; those two extensions route through
/// `libheif-rs` instead. If the HEIF codec is unavailable at runtime the
/// caller still returns `success:true` with no thumbnail — an unsupported
/// format is not treated as an error.
fn decode(bytes: &[u8], ext: &str) -> ProcessingResult<DynamicImage> {
    if ext == "heic" || ext == "heif" {
        return decode_heif(bytes);
    }
    image::load_from_memory(bytes).map_err(ProcessingError::from)
}

fn decode_heif(bytes: &[u8]) -> ProcessingResult<DynamicImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes)
        .map_err(|err| ProcessingError::Converter(format!("heif read: {err}")))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|err| ProcessingError::Converter(format!("heif primary image: {err}")))?;
    let image = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|err| ProcessingError::Converter(format!("heif decode: {err}")))?;

    let plane = image
        .planes()
        .interleaved
        .ok_or_else(|| ProcessingError::Converter("heif image has no interleaved plane".into()))?;

    let width = plane.width;
    let height = plane.height;
    let stride = plane.stride;
    let data = plane.data;

    let mut buffer = Vec::with_capacity((width * height * 3) as usize);
    for row in 0..height {
        let start = (row as usize) * stride;
        let end = start + (width as usize) * 3;
        buffer.extend_from_slice(&data[start..end]);
    }

    image::RgbImage::from_raw(width, height, buffer)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ProcessingError::Converter("heif buffer size mismatch".into()))
}
