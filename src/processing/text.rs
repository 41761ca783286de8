use std::path::Path;

use tokio::fs;

use super::ProcessContext;
use crate::error::ProcessingResult;
use crate::models::ProcessorResult;

/// Reads a known plain-text extension, UTF-8 first, latin-1 fallback,
/// capped at `MAX_TEXT_LENGTH` bytes.
pub async fn read_known_text(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<ProcessorResult> {
    let bytes = fs::read(input_path).await?;
    let capped = &bytes[..bytes.len().min(ctx.settings.max_text_length)];

    let text = decode_utf8_then_latin1(capped);

    let mut result = ProcessorResult::ok("");
    if !text.trim().is_empty() {
        result.extracted_text = Some(text);
    }
    Ok(result)
}

/// Unknown-extension fallback: only applies if the file is small, has no
/// NUL bytes, decodes cleanly, and is overwhelmingly printable/whitespace.
pub async fn try_unknown_text_fallback(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<ProcessorResult> {
    let metadata = fs::metadata(input_path).await?;
    if metadata.len() > ctx.settings.text_fallback_max_size {
        return Ok(ProcessorResult::ok(""));
    }

    let bytes = fs::read(input_path).await?;
    if bytes.contains(&0u8) {
        return Ok(ProcessorResult::ok(""));
    }

    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => text.to_string(),
        Err(_) => return Ok(ProcessorResult::ok("")),
    };

    if text.is_empty() {
        return Ok(ProcessorResult::ok(""));
    }

    let printable = text
        .chars()
        .filter(|c| c.is_whitespace() || !c.is_control())
        .count();
    let fraction = printable as f32 / text.chars().count() as f32;

    let mut result = ProcessorResult::ok("");
    if fraction >= ctx.settings.text_fallback_min_printable {
        let capped_len = text.len().min(ctx.settings.max_text_length);
        let mut cut = capped_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        result.extracted_text = Some(text[..cut].to_string());
    }
    Ok(result)
}

fn decode_utf8_then_latin1(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bytes_decode_directly() {
        let decoded = decode_utf8_then_latin1("hello world".as_bytes());
        assert_eq!(decoded, "hello world");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let bytes = [0xe9, 0x20, b'a']; // 'é' in latin-1, invalid utf-8 lead byte
        let decoded = decode_utf8_then_latin1(&bytes);
        assert_eq!(decoded.chars().next(), Some(0xe9 as char));
    }
}
