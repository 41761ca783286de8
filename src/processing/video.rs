use std::path::Path;

use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout as with_timeout;

use super::{crop, target_dimensions, ProcessContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::ProcessorResult;

/// Video path: extract a frame at t=1s, falling back to the first frame
/// if seeking past end-of-stream fails, then cover-crop like any other
/// raster image.
pub async fn process(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
) -> ProcessingResult<ProcessorResult> {
    let scratch = TempDir::new()?;
    let frame_path = scratch.path().join("frame.png");

    if !extract_frame(ctx, input_path, &frame_path, "00:00:01").await? {
        if !extract_frame(ctx, input_path, &frame_path, "00:00:00").await? {
            return Err(ProcessingError::Converter(
                "ffmpeg produced no frame at t=1s or t=0".to_string(),
            ));
        }
    }

    let frame_bytes = fs::read(&frame_path).await?;
    let image = image::load_from_memory(&frame_bytes)?;

    let (target_w, target_h) = target_dimensions(ctx.settings, "mp4");
    let thumbnail = crop::cover_crop(&image, target_w, target_h, ctx.settings.thumbnail_crop_position);
    let png_bytes = crop::encode_png(&thumbnail)?;

    let mut result = ProcessorResult::ok("");
    let thumbnail_path = ctx.work_dir.join("thumbnail.png");
    fs::write(&thumbnail_path, &png_bytes).await?;
    result.thumbnail_file = Some("thumbnail.png".to_string());

    Ok(result)
}

/// Runs ffmpeg to grab one frame at `seek_time`; returns `false` (instead
/// of erroring) if ffmpeg exits non-zero or writes nothing, so the caller
/// can retry at t=0.
async fn extract_frame(
    ctx: &ProcessContext<'_>,
    input_path: &Path,
    frame_path: &Path,
    seek_time: &str,
) -> ProcessingResult<bool> {
    let mut command = Command::new(&ctx.settings.ffmpeg_binary);
    command
        .arg("-y")
        .arg("-ss")
        .arg(seek_time)
        .arg("-i")
        .arg(input_path)
        .arg("-frames:v")
        .arg("1")
        .arg(frame_path);

    let run = with_timeout(ctx.settings.video_frame_timeout, command.output())
        .await
        .map_err(|_| ProcessingError::SidecarTimeout(ctx.settings.video_frame_timeout))??;

    Ok(run.status.success() && fs::metadata(frame_path).await.is_ok())
}
