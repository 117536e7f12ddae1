use engine::naming::collection_name;
use engine::Segment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{ProjectRepository, ProjectStatus, VectorRecord, VectorStore};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentMetadata {
    start_time: String,
    end_time: String,
    #[serde(default)]
    key_elements: Vec<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub key_elements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub score: f32,
}

/// Per-project similarity index over segment descriptions.
///
/// Each project gets its own collection, named from its id, so lookups and
/// drops need no catalog and a query can only ever see its own project.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    projects: Arc<dyn ProjectRepository>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, projects: Arc<dyn ProjectRepository>) -> Self {
        Self { store, projects }
    }

    /// Index every segment and mark the project `ready`.
    pub fn add_segments(
        &self,
        project_id: &str,
        segments: &[Segment],
        embeddings: &[Vec<f32>],
    ) -> PipelineResult<usize> {
        if segments.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "no segments to index".to_string(),
            ));
        }
        if segments.len() != embeddings.len() {
            return Err(PipelineError::InvalidRequest(format!(
                "{} segments but {} embeddings",
                segments.len(),
                embeddings.len()
            )));
        }

        let records: Vec<VectorRecord> = segments
            .iter()
            .zip(embeddings)
            .map(|(segment, embedding)| {
                let metadata = SegmentMetadata {
                    start_time: segment.start_time.clone(),
                    end_time: segment.end_time.clone(),
                    key_elements: segment.key_elements.clone(),
                    thumbnail: segment.thumbnail.clone(),
                };
                VectorRecord {
                    id: Uuid::new_v4().to_string(),
                    embedding: embedding.clone(),
                    document: segment.description.clone(),
                    metadata: serde_json::to_value(metadata).unwrap_or_default(),
                }
            })
            .collect();

        let collection = collection_name(project_id);
        self.store.add(&collection, &records)?;

        if let Err(err) = self.projects.update_status(project_id, ProjectStatus::Ready) {
            warn!(project_id, error = %err, "rolling back index write");
            if let Err(drop_err) = self.store.drop_collection(&collection) {
                warn!(project_id, error = %drop_err, "rollback failed");
            }
            return Err(PipelineError::IndexWrite(err.to_string()));
        }

        info!(project_id, count = records.len(), "segments indexed");
        Ok(records.len())
    }

    pub fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> PipelineResult<Vec<SearchResult>> {
        let hits = match self.store.query(&collection_name(project_id), embedding, k)? {
            Some(hits) => hits,
            None => return Ok(Vec::new()),
        };

        Ok(hits
            .into_iter()
            .map(|hit| {
                let meta: Option<SegmentMetadata> = serde_json::from_value(hit.metadata).ok();
                let meta = meta.unwrap_or(SegmentMetadata {
                    start_time: String::new(),
                    end_time: String::new(),
                    key_elements: Vec::new(),
                    thumbnail: None,
                });
                SearchResult {
                    id: hit.id,
                    description: hit.document,
                    start_time: meta.start_time,
                    end_time: meta.end_time,
                    key_elements: meta.key_elements,
                    thumbnail: meta.thumbnail,
                    score: hit.score,
                }
            })
            .collect())
    }

    pub fn delete(&self, project_id: &str) -> PipelineResult<()> {
        if self.store.drop_collection(&collection_name(project_id))? {
            info!(project_id, "vector collection dropped");
        }
        Ok(())
    }
}
