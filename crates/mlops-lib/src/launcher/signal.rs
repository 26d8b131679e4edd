//! Marker-file retrain signal
//!
//! `SignalFileLauncher` drops a marker file; `SignalMonitor` polls for it,
//! consumes it and starts the real trainer. The file is claimed by renaming
//! it first, so two monitors never both act on one signal.

use super::{JobHandle, JobLauncher, JobOutcome, LaunchError};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Requests training by writing a marker file
#[derive(Debug, Clone)]
pub struct SignalFileLauncher {
    path: PathBuf,
}

impl SignalFileLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobLauncher for SignalFileLauncher {
    async fn launch_training_job(&self) -> Result<JobHandle, LaunchError> {
        let signal_err = |source| LaunchError::Signal {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(signal_err)?;
        }

        let now = chrono::Utc::now();
        let content = format!("Retraining requested at {}\n", now.to_rfc3339());
        fs::write(&self.path, content).map_err(signal_err)?;

        let id = format!("signal-{}", now.timestamp_millis());
        info!(job_id = %id, path = %self.path.display(), "Retrain signal written");
        Ok(JobHandle::resolved(id, JobOutcome::Detached))
    }
}

/// Watches for the marker file and launches the trainer when it appears
pub struct SignalMonitor {
    path: PathBuf,
    check_interval: Duration,
    launcher: Arc<dyn JobLauncher>,
}

impl SignalMonitor {
    pub fn new(path: impl Into<PathBuf>, launcher: Arc<dyn JobLauncher>) -> Self {
        Self {
            path: path.into(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            launcher,
        }
    }

    pub fn check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Consume a pending signal, if any, and run the trainer to completion
    pub async fn check_once(&self) -> Result<Option<JobOutcome>, LaunchError> {
        let Some(content) = self.claim_signal()? else {
            return Ok(None);
        };

        info!(path = %self.path.display(), signal = %content.trim(), "Retrain signal detected");

        let handle = self.launcher.launch_training_job().await?;
        let job_id = handle.id().to_string();
        let outcome = handle.wait().await;

        match &outcome {
            JobOutcome::Failed { .. } => {
                error!(job_id = %job_id, outcome = %outcome, "Retraining failed")
            }
            _ => info!(job_id = %job_id, outcome = %outcome, "Retraining finished"),
        }
        Ok(Some(outcome))
    }

    /// Poll until a shutdown message arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            path = %self.path.display(),
            interval_secs = self.check_interval.as_secs_f64(),
            "Signal monitor started"
        );

        let mut ticker = interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once().await {
                        error!(error = %e, "Failed to launch training from signal");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Signal monitor stopping");
                    break;
                }
            }
        }
    }

    /// Rename the marker aside, read it, delete it
    fn claim_signal(&self) -> Result<Option<String>, LaunchError> {
        let claimed = self.path.with_file_name(format!(
            ".{}.{}.claimed",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("signal"),
            std::process::id()
        ));

        match fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LaunchError::Signal {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        let content = fs::read_to_string(&claimed).unwrap_or_default();
        if let Err(e) = fs::remove_file(&claimed) {
            warn!(path = %claimed.display(), error = %e, "Failed to remove claimed signal");
        }
        Ok(Some(content))
    }
}
