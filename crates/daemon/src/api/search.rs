use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

use super::json_body;
use crate::error::PipelineResult;
use crate::index::SearchResult;
use crate::pipeline::{ClipOutcome, Pipeline};

#[derive(Deserialize)]
pub struct QueryRequest {
    project_id: String,
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    project_id: String,
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
pub struct ClipRequest {
    project_id: String,
    start_time: String,
    end_time: String,
}

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/query", post(query_segments))
        .route("/clip", post(create_clip))
        .with_state(pipeline)
}

async fn query_segments(
    State(pipeline): State<Pipeline>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> PipelineResult<Json<QueryResponse>> {
    let req = json_body(payload)?;
    let results = pipeline.query(&req.project_id, &req.query, req.limit).await?;
    Ok(Json(QueryResponse {
        project_id: req.project_id,
        results,
    }))
}

async fn create_clip(
    State(pipeline): State<Pipeline>,
    payload: Result<Json<ClipRequest>, JsonRejection>,
) -> PipelineResult<Json<ClipOutcome>> {
    let req = json_body(payload)?;
    let clip = pipeline
        .create_clip(&req.project_id, &req.start_time, &req.end_time)
        .await?;
    Ok(Json(clip))
}
