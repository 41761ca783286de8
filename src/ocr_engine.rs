use std::collections::HashSet;
use std::path::Path;

use image::GenericImageView;
use ocrs::{ImageSource, OcrEngine as Ocrs, OcrEngineParams};
use rten::Model;

use crate::error::{OcrEngineError, OcrEngineResult};
use crate::models::OcrResponse;

/// Wraps the `ocrs` pure-Rust OCR engine. Loads its detection and
/// recognition models once at sidecar startup and is reused for every
/// request the sidecar serves; `ocrs::OcrEngine`'s methods take `&self`,
/// so one instance is shared across the whole process lifetime without a
/// lock (requests are already serialized by the sidecar's single-threaded
/// poll loop).
pub struct OcrEngine {
    engine: Ocrs,
    wordlist: HashSet<String>,
}

impl OcrEngine {
    pub fn load(
        detection_model_path: &Path,
        recognition_model_path: &Path,
        wordlist_path: Option<&Path>,
    ) -> OcrEngineResult<Self> {
        let detection_model = Model::load_file(detection_model_path)
            .map_err(|err| OcrEngineError::ModelLoad(format!("detection model: {err}")))?;
        let recognition_model = Model::load_file(recognition_model_path)
            .map_err(|err| OcrEngineError::ModelLoad(format!("recognition model: {err}")))?;

        let engine = Ocrs::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| OcrEngineError::ModelLoad(err.to_string()))?;

        let wordlist = match wordlist_path {
            Some(path) => load_wordlist(path)?,
            None => HashSet::new(),
        };

        Ok(Self { engine, wordlist })
    }

    /// Runs detection, recognition, and quality scoring on one image:
    /// text, per-token-averaged confidence, wordlist quality, word/char
    /// counts.
    pub fn recognize(&self, image_path: &Path) -> OcrEngineResult<OcrResponse> {
        let image = image::open(image_path)?;
        let rgb = image.to_rgb8();
        let (width, height) = image.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
            .map_err(|err| OcrEngineError::Recognition(format!("image source: {err}")))?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| OcrEngineError::Recognition(format!("prepare input: {err}")))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| OcrEngineError::Recognition(format!("detect words: {err}")))?;
        let lines = self.engine.find_text_lines(&input, &word_rects);
        let recognized_lines = self
            .engine
            .recognize_text(&input, &lines)
            .map_err(|err| OcrEngineError::Recognition(format!("recognize text: {err}")))?;

        let mut text_lines = Vec::new();
        let mut confidences = Vec::new();
        for line in recognized_lines.into_iter().flatten() {
            for word in line.words() {
                confidences.push(word.confidence());
            }
            text_lines.push(line.to_string());
        }

        let text = text_lines.join("\n");
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };
        let quality = compute_quality(&text, &self.wordlist);

        Ok(OcrResponse {
            text: text.clone(),
            confidence,
            quality,
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
        })
    }
}

/// Fraction of "checkable" tokens (lowercase, length >= 3, purely
/// alphabetic after stripping surrounding punctuation) present in the
/// loaded wordlist. Fewer than 3 checkable tokens is treated as
/// insufficient evidence and scores 0.5.
fn compute_quality(text: &str, wordlist: &HashSet<String>) -> f32 {
    if wordlist.is_empty() || text.trim().is_empty() {
        return 0.5;
    }

    let checkable: Vec<String> = text
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| ".,;:!?()[]{}\"'-".contains(c)).to_ascii_lowercase())
        .filter(|word| word.len() >= 3 && word.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();

    if checkable.len() < 3 {
        return 0.5;
    }

    let recognized = checkable.iter().filter(|word| wordlist.contains(word.as_str())).count();
    recognized as f32 / checkable.len() as f32
}

fn load_wordlist(path: &Path) -> OcrEngineResult<HashSet<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.lines().map(|line| line.trim().to_string()).filter(|line| !line.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wordlist(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn quality_insufficient_evidence_below_three_checkable_words() {
        assert_eq!(compute_quality("hi ab", &wordlist(&["hello", "world"])), 0.5);
    }

    #[test]
    fn quality_empty_wordlist_is_insufficient_evidence() {
        assert_eq!(compute_quality("hello world friend", &wordlist(&[])), 0.5);
    }

    #[test]
    fn quality_scores_recognized_fraction() {
        let quality = compute_quality("hello world unknown, text!", &wordlist(&["hello", "world"]));
        assert!((quality - (2.0 / 4.0)).abs() < 1e-6);
    }
}
