use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::timecode::{Timecode, TimecodeError};

/// One AI-described span of a video. The atomic unit of search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    #[serde(default)]
    pub key_elements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl Segment {
    pub fn start(&self) -> Result<Timecode, TimecodeError> {
        Timecode::parse(&self.start_time)
    }

    pub fn end(&self) -> Result<Timecode, TimecodeError> {
        Timecode::parse(&self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
    #[error("{field}: {source}")]
    Timecode {
        field: &'static str,
        #[source]
        source: TimecodeError,
    },
    #[error("segment ends ({end}) before it starts ({start})")]
    Inverted { start: String, end: String },
    #[error("malformed analysis output: {0}")]
    Malformed(String),
}

/// Segment as it comes back from the analysis service, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key_elements: Option<Vec<String>>,
}

impl RawSegment {
    pub fn validate(self) -> Result<Segment, SegmentError> {
        let start_time = required(self.start_time, "start_time")?;
        let end_time = required(self.end_time, "end_time")?;
        let description = required(self.description, "description")?;

        let start = Timecode::parse(&start_time).map_err(|source| SegmentError::Timecode {
            field: "start_time",
            source,
        })?;
        let end = Timecode::parse(&end_time).map_err(|source| SegmentError::Timecode {
            field: "end_time",
            source,
        })?;
        if end < start {
            return Err(SegmentError::Inverted {
                start: start_time,
                end: end_time,
            });
        }

        let key_elements = self
            .key_elements
            .unwrap_or_default()
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Segment {
            start_time,
            end_time,
            description,
            key_elements,
            thumbnail: None,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, SegmentError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(SegmentError::MissingField(field))
}

/// Outcome of validating a whole analysis response.
#[derive(Debug, Default)]
pub struct SegmentBatch {
    /// Valid segments in chronological order.
    pub segments: Vec<Segment>,
    /// Index into the raw list and the reason each rejected item was dropped.
    pub rejected: Vec<(usize, SegmentError)>,
}

/// Validate the JSON text returned by the analysis service.
///
/// Accepts either `{"segments": [...]}` or a bare array. Items that fail
/// validation are reported in `rejected`; only an unreadable document is an
/// error. An empty `segments` list is left for the caller to judge.
pub fn parse_analysis_response(text: &str) -> Result<SegmentBatch, SegmentError> {
    let doc: Value =
        serde_json::from_str(text.trim()).map_err(|e| SegmentError::Malformed(e.to_string()))?;

    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("segments") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(SegmentError::Malformed(format!(
                    "`segments` is not a list: {}",
                    other
                )))
            }
            None => return Err(SegmentError::Malformed("no `segments` field".to_string())),
        },
        other => {
            return Err(SegmentError::Malformed(format!(
                "unexpected document: {}",
                other
            )))
        }
    };

    let mut batch = SegmentBatch::default();
    let mut keyed = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let validated = serde_json::from_value::<RawSegment>(item)
            .map_err(|e| SegmentError::Malformed(e.to_string()))
            .and_then(RawSegment::validate);
        match validated {
            Ok(segment) => {
                let start = segment.start().map(Timecode::as_secs).unwrap_or_default();
                keyed.push((start, segment));
            }
            Err(err) => batch.rejected.push((index, err)),
        }
    }

    keyed.sort_by_key(|(start, _)| *start);
    batch.segments = keyed.into_iter().map(|(_, s)| s).collect();
    Ok(batch)
}
