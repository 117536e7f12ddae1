use async_trait::async_trait;
use engine::segment::parse_analysis_response;
use engine::Segment;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

pub mod gemini;

pub use gemini::GeminiAnalyzer;

pub const ANALYSIS_PROMPT: &str = "Analyze this video and break it down into chronological segments. \
For each segment, provide the start/end times (HH:MM:SS), a detailed description, and key elements. \
Ensure segments cover the entire video duration.";

/// External AI service that turns a video into described segments.
#[async_trait]
pub trait VideoAnalyzer: Send + Sync {
    /// Segments in chronological order. Never empty on success.
    async fn analyze(&self, video: &Path) -> PipelineResult<Vec<Segment>>;
}

/// Validate raw analysis output into segments, dropping malformed items.
pub fn segments_from_response(text: &str) -> PipelineResult<Vec<Segment>> {
    let batch = parse_analysis_response(text).map_err(|e| PipelineError::Analysis(e.to_string()))?;
    for (index, reason) in &batch.rejected {
        warn!(index, %reason, "dropping malformed segment");
    }
    if batch.segments.is_empty() {
        return Err(PipelineError::Analysis(
            "analysis returned no usable segments".to_string(),
        ));
    }
    Ok(batch.segments)
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Check up to `max_attempts` times, sleeping `interval` between checks.
///
/// Running out of attempts is an `AnalysisTimeout`, distinct from the
/// service reporting a failure.
pub async fn poll_bounded<T, F, Fut>(policy: PollPolicy, mut check: F) -> PipelineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PipelineResult<Poll<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending => {
                debug!(attempt, max = policy.max_attempts, "still processing");
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
    Err(PipelineError::AnalysisTimeout {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: PollPolicy = PollPolicy {
        interval: Duration::from_millis(1),
        max_attempts: 4,
    };

    #[tokio::test]
    async fn stops_as_soon_as_ready() {
        let calls = AtomicU32::new(0);
        let value = poll_bounded(FAST, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if attempt == 3 {
                    Poll::Ready("active")
                } else {
                    Poll::Pending
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "active");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_with_a_timeout() {
        let calls = AtomicU32::new(0);
        let err = poll_bounded::<(), _, _>(FAST, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Poll::Pending) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisTimeout { attempts: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn service_failures_end_polling_immediately() {
        let err = poll_bounded::<(), _, _>(FAST, |_| async {
            Err(PipelineError::Analysis("FAILED".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Analysis(_)));
    }

    #[test]
    fn empty_or_unusable_output_is_an_analysis_failure() {
        assert!(matches!(
            segments_from_response(r#"{"segments": []}"#),
            Err(PipelineError::Analysis(_))
        ));
        assert!(matches!(
            segments_from_response(r#"{"segments": [{"description": "no times"}]}"#),
            Err(PipelineError::Analysis(_))
        ));
        let ok = segments_from_response(
            r#"{"segments": [{"start_time": "0:00", "end_time": "0:05", "description": "hi", "key_elements": []}]}"#,
        )
        .unwrap();
        assert_eq!(ok.len(), 1);
    }
}
