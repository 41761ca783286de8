use std::path::Path;

use tokio::fs;

use super::{cad_client, crop, pdf, target_dimensions, ProcessContext};
use crate::error::ProcessingResult;
use crate::models::ProcessorResult;

/// DWG/DXF path: ship to the CAD sidecar, get a PDF back, rasterize at
/// `DWG_INTERMEDIATE_DPI`, content-aware crop, resize, and extract text
/// from the intermediate PDF directly — it is a generated-PDF origin, so
/// no OCR comparison.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    ext: &str,
) -> ProcessingResult<ProcessorResult> {
    let input_bytes = fs::read(input_path).await?;
    let pdf_bytes =
        cad_client::request_conversion(ctx.cad_exchange_dir, &input_bytes, ext, ctx.cad_timeout)
            .await?;

    let (target_w, target_h) = target_dimensions(ctx.settings, ext);
    let rendered = pdf::render_first_page(&pdf_bytes, ctx.settings.dwg_intermediate_dpi)?;

    let rect = crop::content_aware_crop(&rendered, ctx.settings.dwg_white_threshold);
    let cropped = rendered.crop_imm(rect.x, rect.y, rect.w, rect.h);
    let thumbnail = cropped.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");
    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());

    let text = pdf::extract_text(&pdf_bytes)?;
    if !text.trim().is_empty() {
        result.extracted_text = Some(text);
    }

    Ok(result)
}
