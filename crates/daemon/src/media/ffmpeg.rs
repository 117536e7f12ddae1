use std::path::Path;
use std::sync::Arc;

use super::{CommandFailure, CommandOutput, CommandRunner};

/// H.264 encoder used for proxies and clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoder {
    Libx264,
    /// Hardware encoder on macOS; rate-controlled by bitrate instead of CRF.
    VideoToolbox,
}

impl VideoEncoder {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            VideoEncoder::VideoToolbox
        } else {
            VideoEncoder::Libx264
        }
    }

    fn name(self) -> &'static str {
        match self {
            VideoEncoder::Libx264 => "libx264",
            VideoEncoder::VideoToolbox => "h264_videotoolbox",
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone)]
pub struct FFmpegWrapper {
    bin: String,
    runner: Arc<dyn CommandRunner>,
}

impl FFmpegWrapper {
    pub fn new(bin: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Run ffmpeg non-interactively, overwriting the output. Warnings are
    /// kept on stderr so callers can inspect them.
    pub async fn run(&self, args: Vec<String>) -> Result<CommandOutput, CommandFailure> {
        let mut full = strings(&["-hide_banner", "-nostdin", "-loglevel", "warning", "-y"]);
        full.extend(args);
        self.runner.run(&self.bin, &full).await
    }

    /// Downscale to 360p with low-rate video and 22.05 kHz audio.
    pub fn proxy_args(input: &Path, output: &Path, encoder: VideoEncoder) -> Vec<String> {
        let mut args = vec!["-i".to_string(), path_arg(input)];
        args.extend(strings(&["-vf", "scale=-2:360", "-c:v", encoder.name()]));
        match encoder {
            VideoEncoder::VideoToolbox => args.extend(strings(&["-b:v", "1000k"])),
            VideoEncoder::Libx264 => {
                args.extend(strings(&["-preset", "ultrafast", "-crf", "28"]))
            }
        }
        args.extend(strings(&["-c:a", "aac", "-ar", "22050"]));
        args.push(path_arg(output));
        args
    }

    /// One 280px-wide JPEG frame at `seconds`, seeking before the input.
    pub fn thumbnail_args(input: &Path, seconds: u64, output: &Path) -> Vec<String> {
        let mut args = vec!["-ss".to_string(), seconds.to_string()];
        args.extend(["-i".to_string(), path_arg(input)]);
        args.extend(strings(&["-frames:v", "1", "-vf", "scale=280:-1", "-q:v", "4"]));
        args.push(path_arg(output));
        args
    }

    /// Fast seek to `start`, re-encode `duration` seconds for web playback.
    pub fn clip_reencode_args(
        input: &Path,
        start: u64,
        duration: u64,
        output: &Path,
        encoder: VideoEncoder,
    ) -> Vec<String> {
        let mut args = vec!["-ss".to_string(), start.to_string()];
        args.extend(["-i".to_string(), path_arg(input)]);
        args.extend(["-t".to_string(), duration.to_string()]);
        args.extend(strings(&["-c:v", encoder.name()]));
        match encoder {
            VideoEncoder::VideoToolbox => args.extend(strings(&["-b:v", "4000k"])),
            VideoEncoder::Libx264 => args.extend(strings(&["-preset", "ultrafast"])),
        }
        args.extend(strings(&[
            "-c:a",
            "aac",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]));
        args.push(path_arg(output));
        args
    }

    /// Same range without re-encoding. Cheap but may miss keyframe-less starts.
    pub fn clip_copy_args(input: &Path, start: u64, duration: u64, output: &Path) -> Vec<String> {
        let mut args = vec!["-ss".to_string(), start.to_string()];
        args.extend(["-i".to_string(), path_arg(input)]);
        args.extend(["-t".to_string(), duration.to_string()]);
        args.extend(strings(&[
            "-c",
            "copy",
            "-avoid_negative_ts",
            "make_zero",
            "-movflags",
            "+faststart",
        ]));
        args.push(path_arg(output));
        args
    }
}

/// ffmpeg exits 0 when `-t 0` or a seek past the end leaves nothing to encode.
pub fn reported_empty_output(stderr: &str) -> bool {
    stderr.contains("Output file is empty, nothing was encoded")
}
