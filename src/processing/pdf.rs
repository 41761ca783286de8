use std::path::Path;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tokio::fs;

use super::ocr_client;
use super::{crop, target_dimensions, GENERATED_PDF_SOURCES, ProcessContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::ProcessorResult;

/// PDF path: rasterize page 1 at 150 dpi for the thumbnail, extract
/// embedded page text, and — unless the source is a known generated-PDF
/// origin — decide whether OCR beats the embedded text.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    dimension_ext: &str,
    check_ocr: bool,
) -> ProcessingResult<ProcessorResult> {
    let bytes = fs::read(input_path).await?;

    let (target_w, target_h) = target_dimensions(ctx.settings, dimension_ext);
    let rendered = render_first_page(&bytes, 150)?;
    let thumbnail = crop::cover_crop(&rendered, target_w, target_h, ctx.settings.thumbnail_crop_position);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");
    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());

    let embedded = extract_text(&bytes).unwrap_or_default();
    let embedded_page1 = extract_page_text(&bytes, 0).unwrap_or_default();

    let is_generated_origin = GENERATED_PDF_SOURCES.contains(&dimension_ext);
    let final_text = if check_ocr && !is_generated_origin {
        match ocr_client::request_ocr(ctx.ocr_exchange_dir, &png_bytes, ctx.ocr_timeout).await {
            Ok(ocr) => {
                let (use_ocr, reason) =
                    ocr_client::should_use_ocr(&embedded_page1, &ocr.text, ocr.quality);
                if use_ocr {
                    let all_pages_ocr = ocr_all_pages(ctx, &bytes).await.unwrap_or(ocr.text);
                    ocr_client::final_text(&embedded, &all_pages_ocr, reason)
                } else {
                    embedded.clone()
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "pdf page-1 ocr failed, keeping embedded text");
                embedded.clone()
            }
        }
    } else {
        embedded.clone()
    };

    if !final_text.trim().is_empty() {
        result.extracted_text = Some(final_text);
    }

    Ok(result)
}

/// Re-OCRs every page once the page-1 comparison picks OCR.
async fn ocr_all_pages(ctx: &ProcessContext<'_>, pdf_bytes: &[u8]) -> ProcessingResult<String> {
    let page_count = page_count(pdf_bytes)?;
    let mut pages_text = Vec::with_capacity(page_count);

    for page_index in 0..page_count {
        let rendered = render_page(pdf_bytes, page_index, 150)?;
        let png_bytes = crop::encode_png(&rendered)?;
        let ocr = ocr_client::request_ocr(ctx.ocr_exchange_dir, &png_bytes, ctx.ocr_timeout).await?;
        pages_text.push(ocr.text);
    }

    Ok(pages_text.join("\n\n"))
}

fn pdfium() -> ProcessingResult<Pdfium> {
    std::panic::catch_unwind(Pdfium::default)
        .map_err(|_| ProcessingError::Pdf("failed to initialize PDFium".to_string()))
}

pub fn render_first_page(bytes: &[u8], dpi: u32) -> ProcessingResult<DynamicImage> {
    render_page(bytes, 0, dpi)
}

fn render_page(bytes: &[u8], page_index: u16, dpi: u32) -> ProcessingResult<DynamicImage> {
    let pdfium = pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| ProcessingError::Pdf(format!("load pdf: {err}")))?;
    let pages = document.pages();
    let page = pages
        .get(page_index)
        .map_err(|err| ProcessingError::Pdf(format!("load page {page_index}: {err}")))?;

    // 150 dpi against a 72 dpi page -> scale factor dpi/72.
    let scale = dpi as f32 / 72.0;
    let target_w = (page.width().value * scale) as i32;
    let render_config = PdfRenderConfig::new()
        .set_target_width(target_w.max(1))
        .rotate_if_landscape(PdfPageRenderRotation::None, true);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|err| ProcessingError::Pdf(format!("render page {page_index}: {err}")))?;

    Ok(DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8()))
}

fn page_count(bytes: &[u8]) -> ProcessingResult<usize> {
    let pdfium = pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| ProcessingError::Pdf(format!("load pdf: {err}")))?;
    Ok(document.pages().len() as usize)
}

/// Per-page selectable text, concatenated with a blank line between pages.
pub fn extract_text(bytes: &[u8]) -> ProcessingResult<String> {
    let pdfium = pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| ProcessingError::Pdf(format!("load pdf: {err}")))?;

    let mut parts = Vec::new();
    let pages = document.pages();
    for index in 0..pages.len() {
        let page = pages
            .get(index)
            .map_err(|err| ProcessingError::Pdf(format!("load page {index}: {err}")))?;
        if let Some(page_string) = page_text_string(&page) {
            parts.push(page_string);
        }
    }

    Ok(parts.join("\n\n"))
}

/// Selectable text of a single page, e.g. page 1 for the OCR-policy
/// comparison against `eLen` — using the full multi-page `extract_text`
/// there would inflate `eLen` on multi-page PDFs.
pub fn extract_page_text(bytes: &[u8], page_index: u16) -> ProcessingResult<String> {
    let pdfium = pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| ProcessingError::Pdf(format!("load pdf: {err}")))?;
    let pages = document.pages();
    let page = pages
        .get(page_index)
        .map_err(|err| ProcessingError::Pdf(format!("load page {page_index}: {err}")))?;

    Ok(page_text_string(&page).unwrap_or_default())
}

fn page_text_string(page: &PdfPage<'_>) -> Option<String> {
    let page_text = page.text().ok()?;
    let mut page_string = String::new();
    for segment in page_text.segments().iter() {
        page_string.push_str(&segment.text());
    }
    if page_string.trim().is_empty() {
        None
    } else {
        Some(page_string)
    }
}
