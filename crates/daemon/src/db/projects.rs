use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::Database;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Processing,
    Ready,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Processing => "processing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ProjectStatus::Processing)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ProjectStatus::Processing),
            "ready" => Ok(ProjectStatus::Ready),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(PipelineError::Storage(format!(
                "unknown project status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    /// Absolute path of the acquired source video, empty until acquisition finishes.
    pub video_filename: String,
}

impl Project {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(2)?;
        let status = status_str.parse::<ProjectStatus>().map_err(|_| {
            rusqlite::Error::InvalidColumnType(2, "status".to_string(), rusqlite::types::Type::Text)
        })?;
        let created_at_str: String = row.get(3)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    3,
                    "created_at".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?
            .with_timezone(&Utc);

        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            status,
            created_at,
            video_filename: row.get(4)?,
        })
    }
}

/// Persisted record of projects and their lifecycle.
///
/// Deleting a row never touches the project's media or vector collection;
/// the pipeline owns that cascade.
pub trait ProjectRepository: Send + Sync {
    fn create(&self, name: &str) -> PipelineResult<String>;
    fn update_media(&self, id: &str, name: Option<&str>, path: Option<&Path>)
        -> PipelineResult<()>;
    fn update_status(&self, id: &str, status: ProjectStatus) -> PipelineResult<()>;
    fn get(&self, id: &str) -> PipelineResult<Option<Project>>;
    /// Newest first.
    fn list(&self) -> PipelineResult<Vec<Project>>;
    fn delete(&self, id: &str) -> PipelineResult<()>;
    /// Mark every project still `processing` as `failed`. Returns how many changed.
    fn fail_interrupted(&self) -> PipelineResult<usize>;
}

const PROJECT_COLUMNS: &str = "id, name, status, created_at, video_filename";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ProjectRepository for Database {
    fn create(&self, name: &str) -> PipelineResult<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, name, status, created_at, video_filename)
             VALUES (?1, ?2, ?3, ?4, '')",
            params![id, name, ProjectStatus::Processing.as_str(), now()],
        )?;
        Ok(id)
    }

    fn update_media(
        &self,
        id: &str,
        name: Option<&str>,
        path: Option<&Path>,
    ) -> PipelineResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT name, video_filename FROM projects WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (current_name, current_path) =
            current.ok_or_else(|| PipelineError::ProjectNotFound(id.to_string()))?;

        let new_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or(current_name);
        let new_path = path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(current_path);

        tx.execute(
            "UPDATE projects SET name = ?1, video_filename = ?2 WHERE id = ?3",
            params![new_name, new_path, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_status(&self, id: &str, status: ProjectStatus) -> PipelineResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM projects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current
            .ok_or_else(|| PipelineError::ProjectNotFound(id.to_string()))?
            .parse::<ProjectStatus>()?;

        if current == status {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(PipelineError::InvalidRequest(format!(
                "project {} is already {}",
                id, current
            )));
        }

        tx.execute(
            "UPDATE projects SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> PipelineResult<Option<Project>> {
        let conn = self.lock()?;
        let project = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                |row| Project::from_row(row),
            )
            .optional()?;
        Ok(project)
    }

    fn list(&self) -> PipelineResult<Vec<Project>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects ORDER BY created_at DESC, rowid DESC",
            PROJECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], |row| Project::from_row(row))?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    fn delete(&self, id: &str) -> PipelineResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(PipelineError::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }

    fn fail_interrupted(&self) -> PipelineResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = ?1 WHERE status = ?2",
            params![
                ProjectStatus::Failed.as_str(),
                ProjectStatus::Processing.as_str()
            ],
        )?;
        Ok(changed)
    }
}
