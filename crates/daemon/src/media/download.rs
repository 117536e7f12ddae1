use async_trait::async_trait;
use engine::naming::sanitize_file_name;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{file_len, CommandRunner};
use crate::error::{PipelineError, PipelineResult};

const FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
const PRINT_TEMPLATE: &str = "after_move:%(filepath)s|%(title)s";

#[derive(Debug, Clone)]
pub struct Downloaded {
    /// Absolute path of the finished file.
    pub path: PathBuf,
    pub title: Option<String>,
}

/// Fetches a source video into local storage.
///
/// Implementations must never leave a partial file at a final path.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, dest_dir: &Path) -> PipelineResult<Downloaded>;
}

/// Accept only absolute http(s) URLs.
pub fn validate_source_url(url: &str) -> PipelineResult<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| PipelineError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(PipelineError::InvalidRequest(format!(
            "unsupported url '{}': only http and https are accepted",
            url
        ))),
    }
}

pub struct YtDlpDownloader {
    bin: String,
    runner: Arc<dyn CommandRunner>,
}

impl YtDlpDownloader {
    pub fn new(bin: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    fn args(url: &Url, staging: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            FORMAT.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--restrict-filenames".to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-simulate".to_string(),
            "--print".to_string(),
            PRINT_TEMPLATE.to_string(),
            "-P".to_string(),
            staging.to_string_lossy().into_owned(),
            "-o".to_string(),
            "%(title).150B.%(ext)s".to_string(),
            url.to_string(),
        ]
    }
}

/// Pull `(path, title)` out of the `--print` line.
fn parse_printed(stdout: &str) -> Option<(PathBuf, Option<String>)> {
    let line = stdout.lines().rev().find(|l| l.contains('|'))?;
    let (path, title) = line.split_once('|')?;
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let title = Some(title.trim().to_string()).filter(|t| !t.is_empty() && t != "NA");
    Some((PathBuf::from(path), title))
}

/// Largest regular file in `dir`, for when the printed path is unusable.
async fn largest_file(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(u64, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let len = file_len(&entry.path()).await;
        if len > 0 && best.as_ref().map_or(true, |(b, _)| len > *b) {
            best = Some((len, entry.path()));
        }
    }
    best.map(|(_, p)| p)
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> PipelineResult<Downloaded> {
        let url = validate_source_url(url)?;
        tokio::fs::create_dir_all(dest_dir).await?;

        // Removed on drop, taking any partial download with it.
        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(dest_dir)?;

        info!(%url, "downloading");
        let output = self
            .runner
            .run(&self.bin, &Self::args(&url, staging.path()))
            .await
            .map_err(|e| PipelineError::Download(e.detail()))?;

        let (printed, title) = match parse_printed(&output.stdout) {
            Some((path, title)) => (Some(path), title),
            None => (None, None),
        };
        let staged = match printed {
            Some(path) if file_len(&path).await > 0 => path,
            other => {
                if let Some(path) = other {
                    warn!(path = %path.display(), "printed download path unusable, scanning");
                }
                largest_file(staging.path()).await.ok_or_else(|| {
                    PipelineError::Download("downloader produced no file".to_string())
                })?
            }
        };
        let staging_root = tokio::fs::canonicalize(staging.path()).await?;
        let staged = tokio::fs::canonicalize(&staged).await?;
        if !staged.starts_with(&staging_root) {
            return Err(PipelineError::Download(format!(
                "downloader wrote outside its staging dir: {}",
                staged.display()
            )));
        }

        let file_name = staged
            .file_name()
            .map(|n| sanitize_file_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "video.mp4".to_string());
        let final_path = dest_dir.join(file_name);
        tokio::fs::rename(&staged, &final_path).await?;
        let path = tokio::fs::canonicalize(&final_path).await?;

        info!(path = %path.display(), "download complete");
        Ok(Downloaded { path, title })
    }
}
