use chrono::{SecondsFormat, Utc};
use engine::similarity::cosine_similarity;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::Database;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: Value,
    /// `1 - cosine_distance`, higher is closer.
    pub score: f32,
}

/// Named collections of fixed-dimension vectors with cosine search.
pub trait VectorStore: Send + Sync {
    /// Write all records atomically, creating the collection on first use.
    fn add(&self, collection: &str, records: &[VectorRecord]) -> PipelineResult<()>;
    /// `None` when the collection does not exist.
    fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> PipelineResult<Option<Vec<VectorHit>>>;
    /// Returns whether anything was dropped.
    fn drop_collection(&self, collection: &str) -> PipelineResult<bool>;
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl VectorStore for Database {
    fn add(&self, collection: &str, records: &[VectorRecord]) -> PipelineResult<()> {
        let dimension = match records.first() {
            Some(first) => first.embedding.len(),
            None => return Ok(()),
        };
        if dimension == 0 {
            return Err(PipelineError::IndexWrite("empty embedding".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            return Err(PipelineError::IndexWrite(format!(
                "record {} has {} dimensions, expected {}",
                bad.id,
                bad.embedding.len(),
                dimension
            )));
        }

        let index_err = |e: rusqlite::Error| PipelineError::IndexWrite(e.to_string());
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(index_err)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT dimension FROM vector_collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(index_err)?;
        match existing {
            Some(d) if d as usize != dimension => {
                return Err(PipelineError::IndexWrite(format!(
                    "collection {} holds {}-dimensional vectors, got {}",
                    collection, d, dimension
                )));
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO vector_collections (name, dimension, created_at) VALUES (?1, ?2, ?3)",
                    params![
                        collection,
                        dimension as i64,
                        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
                    ],
                )
                .map_err(index_err)?;
            }
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO vector_records (collection, id, vector_blob, document, metadata_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(index_err)?;
            for record in records {
                stmt.execute(params![
                    collection,
                    record.id,
                    encode_vector(&record.embedding),
                    record.document,
                    record.metadata.to_string()
                ])
                .map_err(index_err)?;
            }
        }

        tx.commit().map_err(index_err)?;
        Ok(())
    }

    fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> PipelineResult<Option<Vec<VectorHit>>> {
        let conn = self.lock()?;
        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM vector_collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        let Some(dimension) = dimension else {
            return Ok(None);
        };
        if dimension as usize != embedding.len() {
            return Err(PipelineError::InvalidRequest(format!(
                "query has {} dimensions, collection {} has {}",
                embedding.len(),
                collection,
                dimension
            )));
        }

        let mut stmt = conn.prepare(
            "SELECT id, vector_blob, document, metadata_json FROM vector_records WHERE collection = ?1",
        )?;
        let rows: Vec<(String, Vec<u8>, String, String)> = stmt
            .query_map(params![collection], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|(id, blob, document, metadata_json)| {
                let score = cosine_similarity(embedding, &decode_vector(&blob));
                let metadata = serde_json::from_str(&metadata_json).unwrap_or(Value::Null);
                VectorHit {
                    id,
                    document,
                    metadata,
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(Some(hits))
    }

    fn drop_collection(&self, collection: &str) -> PipelineResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM vector_records WHERE collection = ?1",
            params![collection],
        )?;
        let removed = tx.execute(
            "DELETE FROM vector_collections WHERE name = ?1",
            params![collection],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            document: format!("doc {}", id),
            metadata: json!({ "start_time": "00:00" }),
        }
    }

    #[test]
    fn query_ranks_by_cosine_score() {
        let db = Database::in_memory().unwrap();
        db.add(
            "c",
            &[
                record("east", vec![1.0, 0.0]),
                record("north", vec![0.0, 1.0]),
                record("north-east", vec![1.0, 1.0]),
            ],
        )
        .unwrap();

        let hits = db.query("c", &[1.0, 0.1], 2).unwrap().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "east");
        assert_eq!(hits[1].id, "north-east");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].metadata["start_time"], "00:00");
    }

    #[test]
    fn missing_collection_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.query("nothing", &[1.0], 5).unwrap().is_none());
    }

    #[test]
    fn dimension_is_fixed_per_collection() {
        let db = Database::in_memory().unwrap();
        db.add("c", &[record("a", vec![1.0, 2.0])]).unwrap();
        let err = db.add("c", &[record("b", vec![1.0, 2.0, 3.0])]).unwrap_err();
        assert!(matches!(err, PipelineError::IndexWrite(_)));

        let mixed = db
            .add("d", &[record("a", vec![1.0]), record("b", vec![1.0, 2.0])])
            .unwrap_err();
        assert!(matches!(mixed, PipelineError::IndexWrite(_)));
        assert!(db.query("d", &[1.0], 5).unwrap().is_none());
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let db = Database::in_memory().unwrap();
        let err = db
            .add("c", &[record("dup", vec![1.0]), record("dup", vec![2.0])])
            .unwrap_err();
        assert!(matches!(err, PipelineError::IndexWrite(_)));
        assert!(db.query("c", &[1.0], 5).unwrap().is_none());
    }

    #[test]
    fn collections_are_isolated_and_droppable() {
        let db = Database::in_memory().unwrap();
        db.add("a", &[record("a1", vec![1.0, 0.0])]).unwrap();
        db.add("b", &[record("b1", vec![1.0, 0.0])]).unwrap();

        let hits = db.query("a", &[1.0, 0.0], 10).unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");

        assert!(db.drop_collection("a").unwrap());
        assert!(!db.drop_collection("a").unwrap());
        assert!(db.query("a", &[1.0, 0.0], 10).unwrap().is_none());
        assert_eq!(db.query("b", &[1.0, 0.0], 10).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn blobs_round_trip_exactly() {
        let v = vec![0.25, -3.5, f32::MIN_POSITIVE];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }
}
