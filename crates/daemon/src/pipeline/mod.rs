//! Submission to searchable project: acquire, proxy, analyze, thumbnail,
//! embed, index. Also owns the per-project operations that need more than
//! one collaborator (query, clip, delete).

use engine::naming::{is_safe_file_name, sanitize_file_name};
use engine::Segment;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::analysis::VideoAnalyzer;
use crate::config::Config;
use crate::db::{Project, ProjectRepository, ProjectStatus, VectorStore};
use crate::embeddings::TextEmbedder;
use crate::error::{PipelineError, PipelineResult};
use crate::index::{SearchResult, VectorIndex};
use crate::media::clip::ClipExtractor;
use crate::media::download::{validate_source_url, MediaDownloader};
use crate::media::ffmpeg::FFmpegWrapper;
use crate::media::proxy::ProxyTranscoder;
use crate::media::thumbnail::ThumbnailExtractor;
use crate::media::{file_len, CommandRunner};

pub mod layout;
pub mod stage;

pub use layout::StorageLayout;
pub use stage::{Stage, StageTracker};

/// Where a project's video comes from.
pub enum Submission {
    Url(String),
    Upload {
        file_name: String,
        staged: NamedTempFile,
    },
}

/// External pieces the pipeline drives. Swapped for fakes in tests.
pub struct Collaborators {
    pub projects: Arc<dyn ProjectRepository>,
    pub vectors: Arc<dyn VectorStore>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub analyzer: Arc<dyn VideoAnalyzer>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub commands: Arc<dyn CommandRunner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub project_id: String,
    pub status: ProjectStatus,
    pub video_filename: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipOutcome {
    pub project_id: String,
    pub filename: String,
    pub clip_url: String,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    layout: StorageLayout,
    projects: Arc<dyn ProjectRepository>,
    index: VectorIndex,
    downloader: Arc<dyn MediaDownloader>,
    analyzer: Arc<dyn VideoAnalyzer>,
    embedder: Arc<dyn TextEmbedder>,
    proxy: ProxyTranscoder,
    thumbnails: ThumbnailExtractor,
    clips: ClipExtractor,
    stages: StageTracker,
    timeout: Duration,
    query_limit: usize,
    thumbnail_concurrency: usize,
}

/// Removes the analysis proxy when dropped, unless analysis ran on the
/// source itself. Runs on success, on error and on cancellation alike.
struct ProxyCleanup {
    proxy: PathBuf,
    source: PathBuf,
}

impl ProxyCleanup {
    fn path(&self) -> &Path {
        &self.proxy
    }
}

impl Drop for ProxyCleanup {
    fn drop(&mut self) {
        if self.proxy == self.source {
            return;
        }
        match std::fs::remove_file(&self.proxy) {
            Ok(()) => tracing::debug!(proxy = %self.proxy.display(), "proxy removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(proxy = %self.proxy.display(), error = %err, "proxy not removed"),
        }
    }
}

impl Pipeline {
    pub fn new(config: &Config, collaborators: Collaborators) -> PipelineResult<Self> {
        let layout = StorageLayout::new(&config.data_dir);
        layout.ensure()?;

        let ffmpeg = FFmpegWrapper::new(config.ffmpeg_bin.clone(), collaborators.commands);
        let inner = Inner {
            index: VectorIndex::new(collaborators.vectors, collaborators.projects.clone()),
            projects: collaborators.projects,
            downloader: collaborators.downloader,
            analyzer: collaborators.analyzer,
            embedder: collaborators.embedder,
            proxy: ProxyTranscoder::new(ffmpeg.clone(), config.proxy_min_bytes),
            thumbnails: ThumbnailExtractor::new(ffmpeg.clone(), layout.scratch_dir()),
            clips: ClipExtractor::new(ffmpeg, config.clip_strategy),
            stages: StageTracker::default(),
            timeout: config.pipeline_timeout,
            query_limit: config.query_limit.max(1),
            thumbnail_concurrency: config.thumbnail_concurrency.max(1),
            layout,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    /// Run a submission to completion.
    ///
    /// The project row exists (as `processing`) before any slow work starts.
    /// The run itself lives in its own task: if the caller goes away the
    /// project still ends up `ready` or `failed`.
    pub async fn submit(&self, submission: Submission) -> PipelineResult<ProcessOutcome> {
        let name = match &submission {
            Submission::Url(url) => {
                validate_source_url(url)?;
                url.trim().to_string()
            }
            Submission::Upload { file_name, .. } => file_name.clone(),
        };

        let project_id = self.inner.projects.create(&name)?;
        info!(project_id = %project_id, source = %name, "project created");
        self.inner.stages.set(&project_id, Stage::Created);

        let inner = self.inner.clone();
        let id = project_id.clone();
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(inner.timeout, inner.run(&id, submission)).await
            {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(inner.timeout.as_secs())),
            };
            if let Err(err) = &result {
                inner.mark_failed(&id, err);
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                let err = PipelineError::Storage(format!("pipeline task aborted: {}", join_err));
                self.inner.mark_failed(&project_id, &err);
                Err(err)
            }
        }
    }

    pub fn project(&self, project_id: &str) -> PipelineResult<Project> {
        self.inner.project(project_id)
    }

    pub fn projects(&self) -> PipelineResult<Vec<Project>> {
        self.inner.projects.list()
    }

    /// Live stage of an in-flight run.
    pub fn stage(&self, project_id: &str) -> Option<Stage> {
        self.inner.stages.get(project_id)
    }

    /// Top `limit` segments of one project for a free-text query, best first.
    pub async fn query(
        &self,
        project_id: &str,
        text: &str,
        limit: Option<usize>,
    ) -> PipelineResult<Vec<SearchResult>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidRequest("query is empty".to_string()));
        }
        let project = self.inner.project(project_id)?;
        if project.status != ProjectStatus::Ready {
            return Ok(Vec::new());
        }

        let k = limit.unwrap_or(self.inner.query_limit).clamp(1, 100);
        let embedding = self
            .inner
            .embedder
            .embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| PipelineError::Embedding("no vector for query".to_string()))?;
        self.inner.index.query(project_id, &embedding, k)
    }

    pub async fn create_clip(
        &self,
        project_id: &str,
        start_time: &str,
        end_time: &str,
    ) -> PipelineResult<ClipOutcome> {
        let project = self.inner.project(project_id)?;
        if project.video_filename.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "project {} has no media yet",
                project_id
            )));
        }

        let source = PathBuf::from(&project.video_filename);
        let clips_dir = self.inner.layout.clips_dir(project_id)?;
        let filename = self
            .inner
            .clips
            .create_clip(&source, &clips_dir, start_time, end_time)
            .await?;
        info!(project_id, clip = %filename, "clip ready");

        Ok(ClipOutcome {
            clip_url: format!("/clips/{}/{}", project.id, filename),
            project_id: project.id,
            filename,
        })
    }

    /// Drop the vector collection, then the media, then the registry row.
    pub async fn delete_project(&self, project_id: &str) -> PipelineResult<()> {
        self.inner.project(project_id)?;
        if self.inner.stages.is_running(project_id) {
            return Err(PipelineError::InvalidRequest(format!(
                "project {} is still processing",
                project_id
            )));
        }

        self.inner.index.delete(project_id)?;
        let dir = self.inner.layout.project_dir(project_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.inner.projects.delete(project_id)?;
        info!(project_id, "project deleted");
        Ok(())
    }

    /// Path of a finished clip. Without a project id every project is
    /// searched, newest first.
    pub async fn resolve_clip(
        &self,
        project_id: Option<&str>,
        filename: &str,
    ) -> PipelineResult<PathBuf> {
        let not_found = || PipelineError::ClipNotFound(filename.to_string());
        if !is_safe_file_name(filename) {
            return Err(not_found());
        }

        let candidates: Vec<String> = match project_id {
            Some(id) => vec![id.to_string()],
            None => self.inner.projects.list()?.into_iter().map(|p| p.id).collect(),
        };
        for id in candidates {
            let Ok(dir) = self.inner.layout.clips_dir(&id) else {
                continue;
            };
            let path = dir.join(filename);
            if file_len(&path).await > 0 {
                return Ok(path);
            }
        }
        Err(not_found())
    }
}

impl Inner {
    fn project(&self, project_id: &str) -> PipelineResult<Project> {
        self.projects
            .get(project_id)?
            .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
    }

    fn mark_failed(&self, project_id: &str, err: &PipelineError) {
        warn!(project_id, error = %err, "pipeline failed");
        self.stages.set(project_id, Stage::Failed);
        if let Err(status_err) = self.projects.update_status(project_id, ProjectStatus::Failed) {
            warn!(project_id, error = %status_err, "could not mark project failed");
        }
    }

    async fn run(&self, project_id: &str, submission: Submission) -> PipelineResult<ProcessOutcome> {
        let media_dir = self.layout.media_dir(project_id)?;
        tokio::fs::create_dir_all(&media_dir).await?;

        self.stages.set(project_id, Stage::Downloading);
        let (source, title) = self.acquire(&media_dir, submission).await?;
        self.projects
            .update_media(project_id, title.as_deref(), Some(source.as_path()))?;

        self.stages.set(project_id, Stage::ProxyPrep);
        let analysis_input = ProxyCleanup {
            proxy: self.proxy.prepare(&source).await,
            source: source.clone(),
        };

        self.stages.set(project_id, Stage::Analyzing);
        let mut segments = self.analyzer.analyze(analysis_input.path()).await?;
        if segments.is_empty() {
            return Err(PipelineError::Analysis(
                "analysis returned no segments".to_string(),
            ));
        }
        info!(project_id, count = segments.len(), "segments received");

        // Thumbnails come from the full-resolution source, not the proxy.
        self.stages.set(project_id, Stage::Thumbnailing);
        let pending: Vec<_> = segments
            .iter()
            .map(|segment| self.thumbnails.extract(&source, &segment.start_time))
            .collect();
        let thumbnails: Vec<Option<String>> = stream::iter(pending)
            .buffered(self.thumbnail_concurrency)
            .collect()
            .await;
        for (segment, thumbnail) in segments.iter_mut().zip(thumbnails) {
            segment.thumbnail = thumbnail;
        }

        self.stages.set(project_id, Stage::Embedding);
        let texts: Vec<String> = segments.iter().map(|s| s.description.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        self.stages.set(project_id, Stage::Indexing);
        self.index.add_segments(project_id, &segments, &embeddings)?;
        self.stages.set(project_id, Stage::Ready);
        drop(analysis_input);

        Ok(ProcessOutcome {
            project_id: project_id.to_string(),
            status: ProjectStatus::Ready,
            video_filename: source.to_string_lossy().into_owned(),
            segments,
        })
    }

    async fn acquire(
        &self,
        media_dir: &Path,
        submission: Submission,
    ) -> PipelineResult<(PathBuf, Option<String>)> {
        match submission {
            Submission::Url(url) => {
                let downloaded = self.downloader.download(&url, media_dir).await?;
                Ok((downloaded.path, downloaded.title))
            }
            Submission::Upload { file_name, staged } => {
                let target = media_dir.join(sanitize_file_name(&file_name));
                staged.persist(&target).map_err(|e| PipelineError::Io(e.error))?;
                info!(path = %target.display(), "upload stored");
                Ok((target, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_cleanup_removes_only_real_proxies() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        let proxy = dir.path().join("proxy_360p_video.mp4");
        std::fs::write(&source, b"source").unwrap();
        std::fs::write(&proxy, b"proxy").unwrap();

        drop(ProxyCleanup {
            proxy: source.clone(),
            source: source.clone(),
        });
        assert!(source.exists());

        drop(ProxyCleanup {
            proxy: proxy.clone(),
            source: source.clone(),
        });
        assert!(!proxy.exists());
        assert!(source.exists());
    }
}
