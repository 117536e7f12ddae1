use engine::naming::proxy_file_name;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::ffmpeg::{FFmpegWrapper, VideoEncoder};
use super::{file_len, PartialFile};
use crate::error::{PipelineError, PipelineResult};

/// Produces the downscaled copy sent to analysis.
///
/// `prepare` never fails: small sources are used as-is and any transcode
/// problem falls back to the source. Callers delete the returned path only
/// when it differs from the source.
#[derive(Clone)]
pub struct ProxyTranscoder {
    ffmpeg: FFmpegWrapper,
    min_bytes: u64,
    encoder: VideoEncoder,
}

impl ProxyTranscoder {
    pub fn new(ffmpeg: FFmpegWrapper, min_bytes: u64) -> Self {
        Self {
            ffmpeg,
            min_bytes,
            encoder: VideoEncoder::platform_default(),
        }
    }

    pub fn with_encoder(mut self, encoder: VideoEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub async fn prepare(&self, source: &Path) -> PathBuf {
        let size = file_len(source).await;
        if size < self.min_bytes {
            debug!(source = %source.display(), size, "source below proxy threshold");
            return source.to_path_buf();
        }

        match self.transcode(source).await {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!(source = %source.display(), error = %err, "using source for analysis");
                source.to_path_buf()
            }
        }
    }

    async fn transcode(&self, source: &Path) -> PipelineResult<PathBuf> {
        let dir = source
            .parent()
            .ok_or_else(|| PipelineError::Proxy("source has no parent directory".to_string()))?;
        let proxy = dir.join(proxy_file_name(source));

        if file_len(&proxy).await > 0 {
            info!(proxy = %proxy.display(), "reusing existing proxy");
            return Ok(proxy);
        }

        info!(proxy = %proxy.display(), "creating analysis proxy");
        let partial = PartialFile::beside(&proxy);
        self.ffmpeg
            .run(FFmpegWrapper::proxy_args(source, partial.path(), self.encoder))
            .await
            .map_err(|e| PipelineError::Proxy(e.detail()))?;

        if partial.written_len().await == 0 {
            return Err(PipelineError::Proxy("encoder wrote an empty file".to_string()));
        }
        partial
            .commit()
            .await
            .map_err(|e| PipelineError::Proxy(e.to_string()))?;
        Ok(proxy)
    }
}
