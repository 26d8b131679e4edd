//! Training job launchers
//!
//! The serving process never trains in-process. It asks a `JobLauncher`
//! to start a training run elsewhere and gets back a handle it can wait
//! on. A process launcher reports the exit status; a signal-file launcher
//! hands off to an external monitor and cannot observe completion.

mod process;
mod signal;

pub use process::{ProcessLauncher, DEFAULT_JOB_TIMEOUT, DEFAULT_TRAINER_COMMAND};
pub use signal::{SignalFileLauncher, SignalMonitor, DEFAULT_CHECK_INTERVAL};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("trainer command is empty")]
    EmptyCommand,

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write retrain signal {path}: {source}")]
    Signal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a launched job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { code: Option<i32>, detail: String },
    /// Handed off; completion cannot be observed
    Detached,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Detached => "detached",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Failed {
                code: Some(code),
                detail,
            } => write!(f, "failed with exit code {}: {}", code, detail),
            JobOutcome::Failed { code: None, detail } => write!(f, "failed: {}", detail),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Handle to a launched training job
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Handle plus the sender the job's watcher completes
    pub fn pending(id: impl Into<String>) -> (Self, oneshot::Sender<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                outcome: rx,
            },
            tx,
        )
    }

    /// Handle that is already resolved
    pub fn resolved(id: impl Into<String>, outcome: JobOutcome) -> Self {
        let (handle, tx) = Self::pending(id);
        let _ = tx.send(outcome);
        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> JobOutcome {
        self.outcome.await.unwrap_or_else(|_| JobOutcome::Failed {
            code: None,
            detail: "job watcher exited without reporting".to_string(),
        })
    }
}

/// Starts training runs outside the caller's process
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch_training_job(&self) -> Result<JobHandle, LaunchError>;
}

/// Last `max_chars` characters of `text`
pub(crate) fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("ééé", 2), "éé");
        assert_eq!(tail("", 5), "");
    }

    #[tokio::test]
    async fn test_resolved_handle() {
        let handle = JobHandle::resolved("job-1", JobOutcome::Succeeded);
        assert_eq!(handle.id(), "job-1");
        assert_eq!(handle.wait().await, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_dropped_watcher_reports_failure() {
        let (handle, tx) = JobHandle::pending("job-2");
        drop(tx);
        assert!(matches!(handle.wait().await, JobOutcome::Failed { code: None, .. }));
    }

    #[test]
    fn test_outcome_display() {
        let failed = JobOutcome::Failed {
            code: Some(2),
            detail: "bad data".to_string(),
        };
        assert_eq!(failed.to_string(), "failed with exit code 2: bad data");
        assert_eq!(JobOutcome::Detached.to_string(), "detached");
    }
}
