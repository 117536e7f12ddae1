use base64::{engine::general_purpose::STANDARD, Engine as _};
use engine::Timecode;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::ffmpeg::FFmpegWrapper;

/// Grabs one small frame per segment as an inline data URI.
///
/// Failures are logged and yield `None`; a missing thumbnail never stops a
/// pipeline run.
#[derive(Clone)]
pub struct ThumbnailExtractor {
    ffmpeg: FFmpegWrapper,
    scratch_dir: PathBuf,
}

impl ThumbnailExtractor {
    pub fn new(ffmpeg: FFmpegWrapper, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub async fn extract(&self, source: &Path, timestamp: &str) -> Option<String> {
        let at = match Timecode::parse(timestamp) {
            Ok(at) => at,
            Err(err) => {
                warn!(timestamp, error = %err, "skipping thumbnail");
                return None;
            }
        };

        // Unique per call and deleted when `frame` drops, on every path.
        let frame = tempfile::Builder::new()
            .prefix("thumb_")
            .suffix(".jpg")
            .tempfile_in(&self.scratch_dir)
            .map_err(|err| warn!(error = %err, "cannot create thumbnail scratch file"))
            .ok()?;

        if let Err(err) = self
            .ffmpeg
            .run(FFmpegWrapper::thumbnail_args(source, at.as_secs(), frame.path()))
            .await
        {
            warn!(timestamp, error = %err.detail(), "thumbnail extraction failed");
            return None;
        }

        match tokio::fs::read(frame.path()).await {
            Ok(bytes) if !bytes.is_empty() => {
                Some(format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)))
            }
            Ok(_) => {
                warn!(timestamp, "thumbnail frame was empty");
                None
            }
            Err(err) => {
                warn!(timestamp, error = %err, "cannot read thumbnail frame");
                None
            }
        }
    }
}
