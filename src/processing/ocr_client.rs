use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{ProcessingError, ProcessingResult};
use crate::models::{OcrRequest, OcrResponse};
use crate::stage::StageDir;

/// Requests OCR for one PNG via the shared `/ocr-exchange` volume: write
/// the image and a `.request` marker, poll for `.result`/`.failed`, clean
/// up either way.
pub async fn request_ocr(
    exchange_dir: &Path,
    png_bytes: &[u8],
    timeout: Duration,
) -> ProcessingResult<OcrResponse> {
    let exchange = StageDir::new(exchange_dir.to_path_buf());
    let job_id = Uuid::new_v4().to_string()[..12].to_string();

    exchange.write_bytes(&job_id, "png", png_bytes).await.map_err(|err| {
        ProcessingError::Sidecar(format!("failed to stage ocr image: {err}"))
    })?;
    exchange
        .write_json(
            &job_id,
            "request",
            &OcrRequest {
                job_id: job_id.clone(),
                image_path: format!("{job_id}.png"),
            },
        )
        .await
        .map_err(|err| ProcessingError::Sidecar(format!("failed to write ocr request: {err}")))?;

    let started = Instant::now();
    let result = loop {
        if exchange.exists(&job_id, "result").await {
            let response: OcrResponse = exchange
                .read_json(&job_id, "result")
                .await
                .map_err(|err| ProcessingError::Sidecar(format!("malformed ocr result: {err}")))?;
            break Ok(response);
        }
        if exchange.exists(&job_id, "failed").await {
            let error = exchange.read_text(&job_id, "failed").await.unwrap_or_default();
            break Err(ProcessingError::Sidecar(error));
        }
        if started.elapsed() >= timeout {
            break Err(ProcessingError::SidecarTimeout(timeout));
        }
        sleep(Duration::from_millis(500)).await;
    };

    exchange.remove(&job_id, "png").await;
    exchange.remove(&job_id, "result").await;
    exchange.remove(&job_id, "failed").await;
    exchange.remove(&job_id, "request").await;

    result
}

/// Decision reason behind `should_use_ocr`'s verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrDecisionReason {
    BothEmpty,
    NoEmbeddedOcrFoundText,
    OcrFoundMore,
    OcrBetterForShortEmbedded,
    EmbeddedOk,
}

pub fn should_use_ocr(embedded_text: &str, ocr_text: &str, ocr_quality: f32) -> (bool, OcrDecisionReason) {
    let emb_len = embedded_text.trim().len();
    let ocr_len = ocr_text.trim().len();

    if emb_len < 10 {
        return if ocr_len > 50 {
            (true, OcrDecisionReason::NoEmbeddedOcrFoundText)
        } else {
            (false, OcrDecisionReason::BothEmpty)
        };
    }

    if ocr_len > emb_len * 2 && ocr_len > 200 {
        return (true, OcrDecisionReason::OcrFoundMore);
    }

    if ocr_len > 100 && ocr_quality > 0.4 && emb_len < 500 && ocr_quality > 0.5 {
        return (true, OcrDecisionReason::OcrBetterForShortEmbedded);
    }

    (false, OcrDecisionReason::EmbeddedOk)
}

pub fn final_text(embedded_text: &str, ocr_text: &str, reason: OcrDecisionReason) -> String {
    let embedded = embedded_text.trim();
    let ocr = ocr_text.trim();

    match reason {
        OcrDecisionReason::BothEmpty => String::new(),
        OcrDecisionReason::EmbeddedOk => embedded.to_string(),
        OcrDecisionReason::OcrFoundMore
        | OcrDecisionReason::OcrBetterForShortEmbedded
        | OcrDecisionReason::NoEmbeddedOcrFoundText => {
            if !embedded.is_empty()
                && embedded.len() > 50
                && reason != OcrDecisionReason::NoEmbeddedOcrFoundText
            {
                format!("{ocr}\n\n--- embedded text ---\n\n{embedded}")
            } else {
                ocr.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_embedded_needs_substantial_ocr() {
        let (use_ocr, reason) = should_use_ocr("", "this is a reasonably long ocr result", 0.6);
        assert!(use_ocr);
        assert_eq!(reason, OcrDecisionReason::NoEmbeddedOcrFoundText);
    }

    #[test]
    fn both_empty_keeps_embedded() {
        let (use_ocr, reason) = should_use_ocr("", "short", 0.1);
        assert!(!use_ocr);
        assert_eq!(reason, OcrDecisionReason::BothEmpty);
    }

    #[test]
    fn ocr_found_much_more_wins() {
        let embedded = "a".repeat(20);
        let ocr = "b".repeat(250);
        let (use_ocr, reason) = should_use_ocr(&embedded, &ocr, 0.3);
        assert!(use_ocr);
        assert_eq!(reason, OcrDecisionReason::OcrFoundMore);
    }

    #[test]
    fn concatenates_when_embedded_substantial() {
        let embedded = "x".repeat(60);
        let text = final_text(&embedded, "ocr text here", OcrDecisionReason::OcrFoundMore);
        assert!(text.starts_with("ocr text here"));
        assert!(text.contains("--- embedded text ---"));
    }

    #[test]
    fn no_embedded_reason_never_concatenates() {
        let text = final_text("short", "ocr result", OcrDecisionReason::NoEmbeddedOcrFoundText);
        assert_eq!(text, "ocr result");
    }
}
