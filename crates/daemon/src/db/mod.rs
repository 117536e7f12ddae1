use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{PipelineError, PipelineResult};

pub mod projects;
pub mod vectors;

pub use projects::{Project, ProjectRepository, ProjectStatus};
pub use vectors::{VectorHit, VectorRecord, VectorStore};

/// SQLite file holding the project registry and the vector collections.
///
/// The mutex is the single writer lock: every mutation takes it for the
/// whole read-modify-write and runs inside one transaction.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening registry at {}", db_path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                video_filename TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects(created_at);

            CREATE TABLE IF NOT EXISTS vector_collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vector_records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                vector_blob BLOB NOT NULL,
                document TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                PRIMARY KEY (collection, id),
                FOREIGN KEY (collection) REFERENCES vector_collections(name) ON DELETE CASCADE
            );",
        )?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> PipelineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Storage("registry lock poisoned".to_string()))
    }
}
