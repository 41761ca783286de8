use image::{DynamicImage, GenericImageView, RgbImage};

use crate::config::CropPosition;

/// Fit-to-fill crop + resize. Crops the source to the same aspect ratio
/// as the target before resizing, so there is no letterboxing and no
/// distortion.
pub fn cover_crop(
    image: &DynamicImage,
    target_w: u32,
    target_h: u32,
    anchor: CropPosition,
) -> DynamicImage {
    let (w, h) = image.dimensions();
    let target_ratio = target_w as f64 / target_h as f64;
    let source_ratio = w as f64 / h as f64;

    let cropped = if source_ratio > target_ratio {
        let crop_w = (h as f64 * target_ratio).round() as u32;
        let crop_w = crop_w.min(w).max(1);
        let x = (w - crop_w) / 2;
        image.crop_imm(x, 0, crop_w, h)
    } else {
        let crop_h = (w as f64 / target_ratio).round() as u32;
        let crop_h = crop_h.min(h).max(1);
        let y = match anchor {
            CropPosition::Top => 0,
            CropPosition::Center => (h - crop_h) / 2,
        };
        image.crop_imm(0, y, w, crop_h)
    };

    cropped.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
}

pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Content-aware crop for CAD intermediate rasters. A pixel is "content"
/// if its grayscale value is below `white_threshold`. We split each axis
/// on gaps of no-content runs at
/// least 15% as long as the overall content span, then pick the
/// (row-region × col-region) rectangle containing the most content
/// pixels, expanded by a 2% margin.
pub fn content_aware_crop(image: &DynamicImage, white_threshold: u8) -> Rect {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();

    let mut row_has_content = vec![false; h as usize];
    let mut col_has_content = vec![false; w as usize];

    for y in 0..h {
        for x in 0..w {
            if gray.get_pixel(x, y).0[0] < white_threshold {
                row_has_content[y as usize] = true;
                col_has_content[x as usize] = true;
            }
        }
    }

    let row_regions = split_into_regions(&row_has_content);
    let col_regions = split_into_regions(&col_has_content);

    let rect = if row_regions.len() <= 1 && col_regions.len() <= 1 {
        bounding_box(&row_has_content, &col_has_content, w, h)
    } else {
        best_region_pair(&gray, &row_regions, &col_regions, white_threshold)
    };

    expand_by_margin(rect, w, h, 0.02)
}

/// Maximal runs of `true` form content spans; a gap of `false` at least
/// 15% as long as the overall content span becomes a split point, and the
/// spans between consecutive splits become regions.
fn split_into_regions(has_content: &[bool]) -> Vec<(usize, usize)> {
    let first = has_content.iter().position(|&v| v);
    let last = has_content.iter().rposition(|&v| v);
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => return Vec::new(),
    };
    let span = (last - first + 1).max(1);
    let gap_threshold = ((span as f64) * 0.15).ceil() as usize;

    let mut regions = Vec::new();
    let mut region_start = first;
    let mut i = first;
    while i <= last {
        if !has_content[i] {
            let gap_start = i;
            while i <= last && !has_content[i] {
                i += 1;
            }
            let gap_len = i - gap_start;
            if gap_len >= gap_threshold.max(1) {
                regions.push((region_start, gap_start.saturating_sub(1).max(region_start)));
                region_start = i;
            }
        } else {
            i += 1;
        }
    }
    regions.push((region_start, last));
    regions
}

fn bounding_box(row_has_content: &[bool], col_has_content: &[bool], w: u32, h: u32) -> Rect {
    let y0 = row_has_content.iter().position(|&v| v).unwrap_or(0);
    let y1 = row_has_content.iter().rposition(|&v| v).unwrap_or(h as usize - 1);
    let x0 = col_has_content.iter().position(|&v| v).unwrap_or(0);
    let x1 = col_has_content.iter().rposition(|&v| v).unwrap_or(w as usize - 1);
    Rect {
        x: x0 as u32,
        y: y0 as u32,
        w: (x1 - x0 + 1) as u32,
        h: (y1 - y0 + 1) as u32,
    }
}

fn best_region_pair(
    gray: &image::GrayImage,
    row_regions: &[(usize, usize)],
    col_regions: &[(usize, usize)],
    white_threshold: u8,
) -> Rect {
    let mut best: Option<(u64, Rect)> = None;

    for &(ry0, ry1) in row_regions {
        for &(cx0, cx1) in col_regions {
            let mut count = 0u64;
            for y in ry0..=ry1 {
                for x in cx0..=cx1 {
                    if gray.get_pixel(x as u32, y as u32).0[0] < white_threshold {
                        count += 1;
                    }
                }
            }
            let rect = Rect {
                x: cx0 as u32,
                y: ry0 as u32,
                w: (cx1 - cx0 + 1) as u32,
                h: (ry1 - ry0 + 1) as u32,
            };
            if best.as_ref().map(|(c, _)| count > *c).unwrap_or(true) {
                best = Some((count, rect));
            }
        }
    }

    best.map(|(_, rect)| rect).unwrap_or(Rect {
        x: 0,
        y: 0,
        w: gray.width(),
        h: gray.height(),
    })
}

fn expand_by_margin(rect: Rect, max_w: u32, max_h: u32, margin_frac: f64) -> Rect {
    let margin_x = (rect.w as f64 * margin_frac).round() as i64;
    let margin_y = (rect.h as f64 * margin_frac).round() as i64;

    let x0 = (rect.x as i64 - margin_x).max(0);
    let y0 = (rect.y as i64 - margin_y).max(0);
    let x1 = ((rect.x + rect.w) as i64 + margin_x).min(max_w as i64);
    let y1 = ((rect.y + rect.h) as i64 + margin_y).min(max_h as i64);

    Rect {
        x: x0 as u32,
        y: y0 as u32,
        w: (x1 - x0).max(1) as u32,
        h: (y1 - y0).max(1) as u32,
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb: RgbImage = image.to_rgb8();
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    rgb.write_to(&mut cursor, image::ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn cover_crop_produces_exact_target_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1200, 900, Rgb([10, 20, 30])));
        let cropped = cover_crop(&img, 400, 300, CropPosition::Top);
        assert_eq!(cropped.dimensions(), (400, 300));
    }

    #[test]
    fn cover_crop_tall_image_center_anchor() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 1200, Rgb([1, 2, 3])));
        let cropped = cover_crop(&img, 400, 300, CropPosition::Center);
        assert_eq!(cropped.dimensions(), (400, 300));
    }

    #[test]
    fn single_content_region_uses_bounding_box() {
        let mut gray = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        for y in 40..60 {
            for x in 40..60 {
                gray.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let rect = content_aware_crop(&DynamicImage::ImageRgb8(gray), 250);
        assert!(rect.x <= 40 && rect.y <= 40);
        assert!(rect.x + rect.w >= 60 && rect.y + rect.h >= 60);
    }
}
