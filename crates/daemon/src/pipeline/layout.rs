use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Where everything lives under the data directory.
///
/// ```text
/// DATA_DIR/registry.db
/// DATA_DIR/projects/<id>/media
/// DATA_DIR/projects/<id>/clips
/// DATA_DIR/uploads
/// DATA_DIR/tmp
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_db(&self) -> PathBuf {
        self.root.join("registry.db")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Only canonical UUIDs map to a directory, so ids taken from a request
    /// can never address anything outside `projects/`.
    pub fn project_dir(&self, project_id: &str) -> PipelineResult<PathBuf> {
        let id = Uuid::parse_str(project_id)
            .map_err(|_| PipelineError::ProjectNotFound(project_id.to_string()))?;
        Ok(self.projects_dir().join(id.hyphenated().to_string()))
    }

    pub fn media_dir(&self, project_id: &str) -> PipelineResult<PathBuf> {
        Ok(self.project_dir(project_id)?.join("media"))
    }

    pub fn clips_dir(&self, project_id: &str) -> PipelineResult<PathBuf> {
        Ok(self.project_dir(project_id)?.join("clips"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn ensure(&self) -> io::Result<()> {
        for dir in [self.projects_dir(), self.uploads_dir(), self.scratch_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// A fresh file for an incoming upload; removed when dropped.
    pub fn staged_upload(&self) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(self.uploads_dir())
    }
}
