use async_trait::async_trait;
use engine::Segment;
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::{poll_bounded, segments_from_response, Poll, PollPolicy, VideoAnalyzer, ANALYSIS_PROMPT};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

/// Gemini REST client: upload, wait for processing, generate, clean up.
pub struct GeminiAnalyzer {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    poll: PollPolicy,
}

fn analysis_err(context: &str) -> impl Fn(reqwest::Error) -> PipelineError + '_ {
    move |e| PipelineError::Analysis(format!("{}: {}", context, e))
}

async fn check_status(response: Response, context: &str) -> PipelineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(PipelineError::Analysis(format!(
        "{} returned {}: {}",
        context, status, body
    )))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "video/mp4",
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "segments": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "start_time": { "type": "STRING" },
                        "end_time": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "key_elements": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["start_time", "end_time", "description", "key_elements"]
                }
            }
        },
        "required": ["segments"]
    })
}

/// Concatenated text parts of the first candidate.
fn candidate_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text).filter(|t| !t.trim().is_empty())
}

impl GeminiAnalyzer {
    pub fn new(config: &Config, api_key: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: config.gemini_api_base.clone(),
            api_key,
            model: config.gemini_model.clone(),
            poll: PollPolicy {
                interval: config.analysis_poll_interval,
                max_attempts: config.analysis_max_polls,
            },
        })
    }

    async fn upload(&self, video: &Path) -> PipelineResult<RemoteFile> {
        let size = tokio::fs::metadata(video).await?.len();
        let mime = mime_for(video);
        let display_name = video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(analysis_err("starting upload"))?;
        let start = check_status(start, "upload start").await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PipelineError::Analysis("no upload url returned".to_string()))?
            .to_string();

        let file = tokio::fs::File::open(video).await?;
        let finished = self
            .client
            .post(upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(analysis_err("uploading video"))?;
        let finished = check_status(finished, "upload").await?;
        let uploaded: UploadResponse = finished
            .json()
            .await
            .map_err(analysis_err("reading upload response"))?;
        Ok(uploaded.file)
    }

    async fn fetch_file(&self, name: &str) -> PipelineResult<RemoteFile> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.api_base, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(analysis_err("checking file state"))?;
        check_status(response, "file state")
            .await?
            .json()
            .await
            .map_err(analysis_err("reading file state"))
    }

    async fn wait_until_active(&self, file: RemoteFile) -> PipelineResult<RemoteFile> {
        if file.state.as_deref() == Some("ACTIVE") {
            return Ok(file);
        }
        let name = file.name.clone();
        poll_bounded(self.poll, |attempt| {
            let name = name.clone();
            async move {
                let current = match self.fetch_file(&name).await {
                    Ok(current) => current,
                    // Transient; the attempt still counts.
                    Err(err) => {
                        warn!(attempt, error = %err, "file state check failed");
                        return Ok(Poll::Pending);
                    }
                };
                match current.state.as_deref() {
                    Some("ACTIVE") => Ok(Poll::Ready(current)),
                    Some("FAILED") => Err(PipelineError::Analysis(
                        "video processing failed on the analysis service".to_string(),
                    )),
                    _ => Ok(Poll::Pending),
                }
            }
        })
        .await
    }

    async fn generate(&self, file: &RemoteFile, fallback_mime: &str) -> PipelineResult<String> {
        let mime = file.mime_type.as_deref().unwrap_or(fallback_mime);
        let request = json!({
            "contents": [{
                "parts": [
                    { "file_data": { "mime_type": mime, "file_uri": file.uri } },
                    { "text": ANALYSIS_PROMPT }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema()
            }
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(analysis_err("requesting analysis"))?;
        let body: Value = check_status(response, "generateContent")
            .await?
            .json()
            .await
            .map_err(analysis_err("reading analysis"))?;

        candidate_text(&body)
            .ok_or_else(|| PipelineError::Analysis("analysis response had no text".to_string()))
    }

    async fn delete_file(&self, name: &str) {
        let result = self
            .client
            .delete(format!("{}/v1beta/{}", self.api_base, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await;
        match result {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => warn!(file = name, status = %r.status(), "remote file not deleted"),
            Err(err) => warn!(file = name, error = %err, "remote file not deleted"),
        }
    }
}

#[async_trait]
impl VideoAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, video: &Path) -> PipelineResult<Vec<Segment>> {
        info!(video = %video.display(), model = %self.model, "uploading for analysis");
        let uploaded = self.upload(video).await?;
        let name = uploaded.name.clone();

        let result = async {
            let active = self.wait_until_active(uploaded).await?;
            info!(file = %active.name, "generating analysis");
            let text = self.generate(&active, mime_for(video)).await?;
            segments_from_response(&text)
        }
        .await;

        self.delete_file(&name).await;
        let segments = result?;
        info!(count = segments.len(), "analysis complete");
        Ok(segments)
    }
}
