use axum::{extract::rejection::JsonRejection, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

pub mod clips;
pub mod process;
pub mod projects;
pub mod search;

/// The daemon's whole HTTP surface.
pub fn app(pipeline: Pipeline, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/health", get(health))
        .merge(process::router(pipeline.clone(), config.max_upload_bytes))
        .merge(projects::router(pipeline.clone()))
        .merge(search::router(pipeline.clone()))
        .merge(clips::router(pipeline))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Malformed JSON bodies are the caller's fault, reported like any other
/// invalid request.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> PipelineResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| PipelineError::InvalidRequest(rejection.body_text()))
}
