use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::Project;
use crate::error::PipelineResult;
use crate::pipeline::{Pipeline, Stage};

#[derive(Serialize)]
pub struct ProjectResponse {
    #[serde(flatten)]
    project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/:id", get(get_project).delete(delete_project))
        .with_state(pipeline)
}

async fn list_projects(State(pipeline): State<Pipeline>) -> PipelineResult<Json<Vec<Project>>> {
    Ok(Json(pipeline.projects()?))
}

async fn get_project(
    State(pipeline): State<Pipeline>,
    Path(id): Path<String>,
) -> PipelineResult<Json<ProjectResponse>> {
    let project = pipeline.project(&id)?;
    let stage = pipeline.stage(&id);
    Ok(Json(ProjectResponse { project, stage }))
}

async fn delete_project(
    State(pipeline): State<Pipeline>,
    Path(id): Path<String>,
) -> PipelineResult<Json<Value>> {
    pipeline.delete_project(&id).await?;
    Ok(Json(json!({ "project_id": id, "deleted": true })))
}
