use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Where a pipeline run currently is. `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Created,
    Downloading,
    ProxyPrep,
    Analyzing,
    Thumbnailing,
    Embedding,
    Indexing,
    Ready,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::Downloading => "downloading",
            Stage::ProxyPrep => "proxy-prep",
            Stage::Analyzing => "analyzing",
            Stage::Thumbnailing => "thumbnailing",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Ready => "ready",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Ready | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live stage of every in-flight run, keyed by project id.
#[derive(Default)]
pub struct StageTracker {
    stages: RwLock<HashMap<String, Stage>>,
}

impl StageTracker {
    pub fn set(&self, project_id: &str, stage: Stage) {
        tracing::info!(project_id, stage = %stage, "pipeline stage");
        let mut stages = self.stages.write().unwrap_or_else(|e| e.into_inner());
        if stage.is_terminal() {
            stages.remove(project_id);
        } else {
            stages.insert(project_id.to_string(), stage);
        }
    }

    pub fn get(&self, project_id: &str) -> Option<Stage> {
        let stages = self.stages.read().unwrap_or_else(|e| e.into_inner());
        stages.get(project_id).copied()
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.get(project_id).is_some()
    }
}
