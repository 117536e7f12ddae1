use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

pub mod clip;
pub mod download;
pub mod ffmpeg;
pub mod proxy;
pub mod thumbnail;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} did not finish within {secs}s")]
    TimedOut { program: String, secs: u64 },
}

impl CommandFailure {
    /// The tool's own diagnostic text, or our description when it never ran.
    pub fn detail(&self) -> String {
        match self {
            CommandFailure::Exit { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Runs external tools. Output is always captured and a non-zero exit is
/// always a failure.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandFailure>;
}

pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandFailure> {
        tracing::debug!(program, ?args, "spawning");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|source| CommandFailure::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(CommandFailure::TimedOut {
                    program: program.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CommandFailure::Exit {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Size of `path`, or 0 if it is missing or unreadable.
pub async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| if m.is_file() { m.len() } else { 0 })
        .unwrap_or(0)
}

/// A hidden, uniquely named file next to `target` that is removed on drop
/// unless it has been moved into place with [`PartialFile::commit`].
pub struct PartialFile {
    path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    pub fn beside(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = target.with_file_name(format!(".{}.{}", Uuid::new_v4().simple(), name));
        Self {
            path,
            target: target.to_path_buf(),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn written_len(&self) -> u64 {
        file_len(&self.path).await
    }

    /// Atomically rename into place.
    pub async fn commit(mut self) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, &self.target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Stand-in for ffmpeg: writes a few bytes to the last argument.
    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: Mutex<Vec<Vec<String>>>,
        pub fail_when: Mutex<Option<String>>,
    }

    impl FakeRunner {
        pub fn failing_on(arg: &str) -> Self {
            let runner = FakeRunner::default();
            *runner.fail_when.lock().unwrap() = Some(arg.to_string());
            runner
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
        ) -> Result<CommandOutput, CommandFailure> {
            self.calls.lock().unwrap().push(args.to_vec());
            let fail_when = self.fail_when.lock().unwrap().clone();
            if let Some(marker) = fail_when {
                if args.iter().any(|a| *a == marker) {
                    return Err(CommandFailure::Exit {
                        program: program.to_string(),
                        status: "exit status: 1".to_string(),
                        stderr: format!("fake failure on {}", marker),
                    });
                }
            }
            let zero_length = args.windows(2).any(|w| w[0] == "-t" && w[1] == "0");
            if let Some(out) = args.last() {
                let bytes: &[u8] = if zero_length { b"" } else { b"fake media" };
                std::fs::write(out, bytes).map_err(|source| CommandFailure::Spawn {
                    program: program.to_string(),
                    source,
                })?;
            }
            Ok(CommandOutput::default())
        }
    }

    #[tokio::test]
    async fn partial_file_is_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mp4");

        let partial = PartialFile::beside(&target);
        std::fs::write(partial.path(), b"x").unwrap();
        let leftover = partial.path().to_path_buf();
        assert!(leftover.file_name().unwrap().to_string_lossy().starts_with('.'));
        assert!(leftover.to_string_lossy().ends_with(".out.mp4"));
        drop(partial);
        assert!(!leftover.exists());

        let partial = PartialFile::beside(&target);
        std::fs::write(partial.path(), b"done").unwrap();
        partial.commit().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"done");
    }
}
