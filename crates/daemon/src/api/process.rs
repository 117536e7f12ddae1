use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::json_body;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Pipeline, ProcessOutcome, Submission};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "webm", "mkv", "m4v"];

#[derive(Deserialize)]
pub struct ProcessRequest {
    url: String,
}

pub fn router(pipeline: Pipeline, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/process", post(process_url))
        .route(
            "/upload",
            post(upload_video).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(pipeline)
}

async fn process_url(
    State(pipeline): State<Pipeline>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> PipelineResult<Json<ProcessOutcome>> {
    let req = json_body(payload)?;
    let outcome = pipeline.submit(Submission::Url(req.url)).await?;
    Ok(Json(outcome))
}

fn check_video_extension(file_name: &str) -> PipelineResult<()> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(PipelineError::InvalidRequest(format!(
            "'{}' is not a supported video file (expected one of: {})",
            file_name,
            VIDEO_EXTENSIONS.join(", ")
        ))),
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> PipelineError {
    PipelineError::InvalidRequest(format!("bad upload: {}", err.body_text()))
}

/// Streams the `file` field to a staged file, then runs it like a URL
/// submission.
async fn upload_video(
    State(pipeline): State<Pipeline>,
    mut multipart: Multipart,
) -> PipelineResult<Json<ProcessOutcome>> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::InvalidRequest("upload has no file name".to_string()))?;
        check_video_extension(&file_name)?;

        let staged = pipeline.layout().staged_upload()?;
        let mut out = tokio::fs::File::from_std(staged.as_file().try_clone()?);
        let mut written: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        drop(out);

        if written == 0 {
            return Err(PipelineError::InvalidRequest(
                "uploaded file is empty".to_string(),
            ));
        }
        info!(file = %file_name, bytes = written, "upload received");

        let outcome = pipeline
            .submit(Submission::Upload { file_name, staged })
            .await?;
        return Ok(Json(outcome));
    }

    Err(PipelineError::InvalidRequest(
        "multipart field 'file' is missing".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_video_extensions_only() {
        assert!(check_video_extension("talk.MP4").is_ok());
        assert!(check_video_extension("clip.webm").is_ok());
        assert!(check_video_extension("notes.txt").is_err());
        assert!(check_video_extension("noext").is_err());
    }
}
