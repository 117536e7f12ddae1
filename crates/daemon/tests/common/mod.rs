#![allow(dead_code)]

use async_trait::async_trait;
use daemon::analysis::VideoAnalyzer;
use daemon::db::Database;
use daemon::embeddings::TextEmbedder;
use daemon::media::download::{Downloaded, MediaDownloader};
use daemon::media::{CommandFailure, CommandOutput, CommandRunner};
use daemon::{Collaborators, Config, Pipeline, PipelineError, PipelineResult};
use engine::Segment;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const SOURCE_BYTES: &[u8] = b"pretend this is an mp4 container";

/// Stand-in for ffmpeg: writes a few bytes to the output argument, or fails
/// when a marker argument is present.
#[derive(Default)]
pub struct FakeCommands {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail_on: Option<String>,
}

impl FakeCommands {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn count_with(&self, arg: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.iter().any(|a| a == arg))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeCommands {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandFailure> {
        self.calls.lock().unwrap().push(args.to_vec());
        if let Some(marker) = &self.fail_on {
            if args.iter().any(|a| a == marker) {
                return Err(CommandFailure::Exit {
                    program: program.to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "Conversion failed!".to_string(),
                });
            }
        }
        if let Some(out) = args.last() {
            std::fs::write(out, b"fake media").map_err(|source| CommandFailure::Spawn {
                program: program.to_string(),
                source,
            })?;
        }
        Ok(CommandOutput::default())
    }
}

/// Drops a small file named `sample.mp4` into the destination.
#[derive(Default)]
pub struct FakeDownloader {
    pub fail: bool,
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> PipelineResult<Downloaded> {
        if self.fail {
            return Err(PipelineError::Download(format!("{} is unavailable", url)));
        }
        let path = dest_dir.join("sample.mp4");
        tokio::fs::write(&path, SOURCE_BYTES).await?;
        Ok(Downloaded {
            path,
            title: Some("Sample Talk".to_string()),
        })
    }
}

/// Returns queued segment lists in order, then the default list forever.
/// With `gated`, every call waits for [`FakeAnalyzer::release`].
pub struct FakeAnalyzer {
    pub queue: Mutex<VecDeque<Vec<Segment>>>,
    pub default: Vec<Segment>,
    pub seen: Mutex<Vec<PathBuf>>,
    pub gate: Option<Notify>,
}

impl FakeAnalyzer {
    pub fn returning(segments: Vec<Segment>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: segments,
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated(segments: Vec<Segment>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::returning(segments)
        }
    }

    pub fn then(self, segments: Vec<Segment>) -> Self {
        self.queue.lock().unwrap().push_back(segments);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn last_seen(&self) -> Option<PathBuf> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VideoAnalyzer for FakeAnalyzer {
    async fn analyze(&self, video: &Path) -> PipelineResult<Vec<Segment>> {
        self.seen.lock().unwrap().push(video.to_path_buf());
        assert!(video.exists(), "analysis input {} is missing", video.display());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| self.default.clone()))
    }
}

/// Bag-of-words hashing embedder: texts sharing a word point the same way.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub fail: bool,
}

const DIM: usize = 256;

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        v[(hasher.finish() as usize) % DIM] += 1.0;
    }
    v[DIM - 1] += 0.01;
    v
}

impl HashEmbedder {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Embedding("service down".to_string()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

pub fn segment(start: &str, end: &str, description: &str) -> Segment {
    Segment {
        start_time: start.to_string(),
        end_time: end.to_string(),
        description: description.to_string(),
        key_elements: vec!["speaker".to_string()],
        thumbnail: None,
    }
}

pub fn talk_segments() -> Vec<Segment> {
    vec![
        segment("00:00:00", "00:00:12", "A speaker walks onto a bright stage"),
        segment("00:00:12", "00:00:40", "A golden retriever dog chases a frisbee across the lawn"),
        segment("00:00:40", "00:01:05", "Closing slide with contact details"),
    ]
}

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub db: Arc<Database>,
    pub commands: Arc<FakeCommands>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub embedder: Arc<HashEmbedder>,
    pub pipeline: Pipeline,
}

pub struct HarnessBuilder {
    pub config: Config,
    pub commands: FakeCommands,
    pub downloader: FakeDownloader,
    pub analyzer: FakeAnalyzer,
    pub embedder: HashEmbedder,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            commands: FakeCommands::default(),
            downloader: FakeDownloader::default(),
            analyzer: FakeAnalyzer::returning(talk_segments()),
            embedder: HashEmbedder::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = self.config;
        config.data_dir = dir.path().join("data");

        let db = Arc::new(Database::in_memory().unwrap());
        let commands = Arc::new(self.commands);
        let analyzer = Arc::new(self.analyzer);
        let embedder = Arc::new(self.embedder);
        let pipeline = Pipeline::new(
            &config,
            Collaborators {
                projects: db.clone(),
                vectors: db.clone(),
                downloader: Arc::new(self.downloader),
                analyzer: analyzer.clone(),
                embedder: embedder.clone(),
                commands: commands.clone(),
            },
        )
        .unwrap();

        Harness {
            dir,
            config,
            db,
            commands,
            analyzer,
            embedder,
            pipeline,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::default().build()
}
