use std::path::Path;

use image::{DynamicImage, RgbaImage};
use tokio::fs;
use usvg::TreeParsing;

use super::{crop, target_dimensions, ProcessContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::ProcessorResult;

/// SVG path: rasterize at the target thumbnail resolution, then
/// cover-crop like any other raster image.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<ProcessorResult> {
    let bytes = fs::read(input_path).await?;
    let (target_w, target_h) = target_dimensions(ctx.settings, "svg");

    let rendered = rasterize(&bytes, target_w, target_h)?;
    let thumbnail = crop::cover_crop(&rendered, target_w, target_h, ctx.settings.thumbnail_crop_position);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");
    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());

    Ok(result)
}

fn rasterize(svg_bytes: &[u8], target_w: u32, target_h: u32) -> ProcessingResult<DynamicImage> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_data(svg_bytes, &opts)
        .map_err(|err| ProcessingError::Converter(format!("svg parse: {err}")))?;

    let size = tree.size;
    let scale = (target_w as f32 / size.width()).max(target_h as f32 / size.height());
    let render_w = (size.width() * scale).ceil().max(1.0) as u32;
    let render_h = (size.height() * scale).ceil().max(1.0) as u32;

    let mut pixmap = tiny_skia::Pixmap::new(render_w, render_h)
        .ok_or_else(|| ProcessingError::Converter("svg render target too large".into()))?;

    let rtree = resvg::Tree::from_usvg(&tree);
    let transform = tiny_skia::Transform::from_scale(scale, scale);
    rtree.render(transform, &mut pixmap.as_mut());

    let rgba = RgbaImage::from_raw(render_w, render_h, pixmap.data().to_vec())
        .ok_or_else(|| ProcessingError::Converter("svg pixmap buffer mismatch".into()))?;
    Ok(DynamicImage::ImageRgba8(rgba))
}
