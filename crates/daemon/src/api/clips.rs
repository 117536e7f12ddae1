use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::Path as FsPath;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/clips/:filename", get(get_clip))
        .route("/clips/:project_id/:filename", get(get_project_clip))
        .with_state(pipeline)
}

async fn get_clip(
    State(pipeline): State<Pipeline>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> PipelineResult<Response> {
    let path = pipeline.resolve_clip(None, &filename).await?;
    serve_video_file(&path, &headers).await
}

async fn get_project_clip(
    State(pipeline): State<Pipeline>,
    Path((project_id, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> PipelineResult<Response> {
    let path = pipeline.resolve_clip(Some(&project_id), &filename).await?;
    serve_video_file(&path, &headers).await
}

fn build_error(err: axum::http::Error) -> PipelineError {
    PipelineError::Storage(format!("building response: {}", err))
}

/// Streams a video file, honouring a single `Range` header so players can seek.
async fn serve_video_file(path: &FsPath, headers: &HeaderMap) -> PipelineResult<Response> {
    let file_size = tokio::fs::metadata(path).await?.len();

    if file_size == 0 {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, "0")
            .body(Body::empty())
            .map_err(build_error);
    }

    let requested = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, file_size));
    let (start, end, status) = match requested {
        Some((start, end)) => (start, end, StatusCode::PARTIAL_CONTENT),
        // An unsatisfiable or malformed range gets the whole file.
        None => (0, file_size - 1, StatusCode::OK),
    };
    let content_length = end - start + 1;

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let stream = FramedRead::new(file.take(content_length), BytesCodec::new())
        .map(|chunk| chunk.map(|bytes| bytes.freeze()));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length.to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_size),
        );
    }

    builder.body(Body::from_stream(stream)).map_err(build_error)
}

/// Parse `bytes=START-END`, `bytes=START-` or `bytes=-SUFFIX` into an
/// inclusive range within `file_size`.
fn parse_range(range: &str, file_size: u64) -> Option<(u64, u64)> {
    let spec = range.trim().strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());
    if file_size == 0 || (start_str.is_empty() && end_str.is_empty()) {
        return None;
    }

    let (start, end) = if start_str.is_empty() {
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end = if end_str.is_empty() {
            file_size - 1
        } else {
            end_str.parse::<u64>().ok()?.min(file_size - 1)
        };
        (start, end)
    };

    if start > end {
        return None;
    }
    Some((start, end))
}
