use engine::naming::clip_file_name;
use engine::{clip_duration, Timecode};
use std::path::Path;
use tracing::{info, warn};

use super::ffmpeg::{reported_empty_output, FFmpegWrapper, VideoEncoder};
use super::{file_len, CommandFailure, PartialFile};
use crate::config::ClipStrategy;
use crate::error::{PipelineError, PipelineResult};

/// Cuts standalone, web-playable sub-ranges out of a source video.
///
/// Output names depend only on the source name and the parsed range, so a
/// repeated request finds the earlier file and returns without encoding.
#[derive(Clone)]
pub struct ClipExtractor {
    ffmpeg: FFmpegWrapper,
    strategy: ClipStrategy,
    encoder: VideoEncoder,
}

impl ClipExtractor {
    pub fn new(ffmpeg: FFmpegWrapper, strategy: ClipStrategy) -> Self {
        Self {
            ffmpeg,
            strategy,
            encoder: VideoEncoder::platform_default(),
        }
    }

    pub fn with_encoder(mut self, encoder: VideoEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Returns the clip's file name inside `clips_dir`.
    pub async fn create_clip(
        &self,
        source: &Path,
        clips_dir: &Path,
        start_time: &str,
        end_time: &str,
    ) -> PipelineResult<String> {
        let start = Timecode::parse(start_time)?;
        let end = Timecode::parse(end_time)?;
        let name = clip_file_name(source, start, end);
        let output = clips_dir.join(&name);

        if file_len(&output).await > 0 {
            info!(clip = %name, "clip already exists");
            return Ok(name);
        }
        if file_len(source).await == 0 {
            return Err(PipelineError::Storage(format!(
                "source media {} is missing",
                source.display()
            )));
        }

        tokio::fs::create_dir_all(clips_dir).await?;
        // Zero-length ranges still go to the encoder and fail there.
        let duration = clip_duration(start, end);

        let partial = match self.strategy {
            ClipStrategy::Reencode => self.reencode(source, start, duration, &output).await?,
            ClipStrategy::CopyThenReencode => {
                match self.stream_copy(source, start, duration, &output).await {
                    Ok(partial) => partial,
                    Err(err) => {
                        warn!(clip = %name, error = %err.detail(), "stream copy failed, re-encoding");
                        self.reencode(source, start, duration, &output).await?
                    }
                }
            }
        };

        partial.commit().await?;
        info!(clip = %name, start = %start, end = %end, "clip created");
        Ok(name)
    }

    async fn reencode(
        &self,
        source: &Path,
        start: Timecode,
        duration: u64,
        output: &Path,
    ) -> PipelineResult<PartialFile> {
        let partial = PartialFile::beside(output);
        let args = FFmpegWrapper::clip_reencode_args(
            source,
            start.as_secs(),
            duration,
            partial.path(),
            self.encoder,
        );
        let result = self.ffmpeg.run(args).await;
        match result {
            Ok(out) => Self::verify(partial, &out.stderr).await.map_err(|detail| {
                PipelineError::ClipEncode { detail }
            }),
            Err(err) => Err(PipelineError::ClipEncode {
                detail: err.detail(),
            }),
        }
    }

    async fn stream_copy(
        &self,
        source: &Path,
        start: Timecode,
        duration: u64,
        output: &Path,
    ) -> Result<PartialFile, CommandFailure> {
        let partial = PartialFile::beside(output);
        let args =
            FFmpegWrapper::clip_copy_args(source, start.as_secs(), duration, partial.path());
        let out = self.ffmpeg.run(args).await?;
        Self::verify(partial, &out.stderr)
            .await
            .map_err(|stderr| CommandFailure::Exit {
                program: "ffmpeg".to_string(),
                status: "exit status: 0".to_string(),
                stderr,
            })
    }

    /// A zero exit is not enough: ffmpeg also "succeeds" with nothing encoded.
    async fn verify(partial: PartialFile, stderr: &str) -> Result<PartialFile, String> {
        if reported_empty_output(stderr) || partial.written_len().await == 0 {
            let detail = if stderr.trim().is_empty() {
                "encoder produced an empty file".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(detail);
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::FakeRunner;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn extractor(runner: Arc<FakeRunner>, strategy: ClipStrategy) -> ClipExtractor {
        ClipExtractor::new(FFmpegWrapper::new("ffmpeg", runner), strategy)
            .with_encoder(VideoEncoder::Libx264)
    }

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("source.mp4");
        std::fs::write(&path, b"source bytes").unwrap();
        path
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn second_request_reuses_the_clip() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let runner = Arc::new(FakeRunner::default());
        let clipper = extractor(runner.clone(), ClipStrategy::Reencode);

        let first = clipper.create_clip(&src, &clips, "00:10", "00:20").await.unwrap();
        let second = clipper.create_clip(&src, &clips, "10", "0:00:20").await.unwrap();

        assert_eq!(first, "clip_00-00-10_00-00-20_source.mp4");
        assert_eq!(first, second);
        assert_eq!(runner.call_count(), 1);
        assert!(file_len(&clips.join(&first)).await > 0);
        assert_eq!(visible_files(&clips), vec![first]);
    }

    #[tokio::test]
    async fn different_ranges_get_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let clipper = extractor(Arc::new(FakeRunner::default()), ClipStrategy::Reencode);

        let a = clipper.create_clip(&src, &clips, "00:00", "00:05").await.unwrap();
        let b = clipper.create_clip(&src, &clips, "00:05", "00:10").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(visible_files(&clips).len(), 2);
    }

    #[tokio::test]
    async fn inverted_range_surfaces_as_encode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let runner = Arc::new(FakeRunner::default());
        let clipper = extractor(runner.clone(), ClipStrategy::Reencode);

        let err = clipper
            .create_clip(&src, &clips, "00:10", "00:05")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClipEncode { .. }));
        assert_eq!(runner.call_count(), 1);
        assert!(visible_files(&clips).is_empty());
    }

    #[tokio::test]
    async fn encoder_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let clipper = extractor(Arc::new(FakeRunner::failing_on("libx264")), ClipStrategy::Reencode);

        match clipper.create_clip(&src, &clips, "0", "5").await {
            Err(PipelineError::ClipEncode { detail }) => {
                assert!(detail.contains("fake failure"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(visible_files(&clips).is_empty());
    }

    #[tokio::test]
    async fn copy_failure_falls_back_to_reencode() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let runner = Arc::new(FakeRunner::failing_on("copy"));
        let clipper = extractor(runner.clone(), ClipStrategy::CopyThenReencode);

        let name = clipper.create_clip(&src, &clips, "0", "5").await.unwrap();
        assert_eq!(runner.call_count(), 2);
        assert!(file_len(&clips.join(name)).await > 0);
    }

    #[tokio::test]
    async fn copy_success_skips_reencode() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let clips = dir.path().join("clips");
        let runner = Arc::new(FakeRunner::default());
        let clipper = extractor(runner.clone(), ClipStrategy::CopyThenReencode);

        clipper.create_clip(&src, &clips, "0", "5").await.unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"copy".to_string()));
    }

    #[tokio::test]
    async fn bad_timecodes_are_rejected_before_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let runner = Arc::new(FakeRunner::default());
        let clipper = extractor(runner.clone(), ClipStrategy::Reencode);

        let err = clipper
            .create_clip(&src, dir.path(), "later", "00:05")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert_eq!(runner.call_count(), 0);
    }
}
