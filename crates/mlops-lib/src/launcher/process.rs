//! Launch the trainer as a child process

use super::{tail, JobHandle, JobLauncher, JobOutcome, LaunchError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_TRAINER_COMMAND: &str = "mlops train";

/// Hard limit on one training run; the child is killed when it passes
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// Characters of trainer output kept for logs
const OUTPUT_TAIL_CHARS: usize = 500;

/// Runs a trainer command and reports its exit status
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
    job_timeout: Duration,
}

impl ProcessLauncher {
    /// Split a whitespace-separated command line into program and arguments
    pub fn from_command_line(command: &str) -> Result<Self, LaunchError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(LaunchError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Kill the trainer if it runs longer than `timeout`
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch_training_job(&self) -> Result<JobHandle, LaunchError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: self.command_line(),
                source,
            })?;

        let id = match child.id() {
            Some(pid) => format!("pid-{}", pid),
            None => format!("job-{}", chrono::Utc::now().timestamp_millis()),
        };
        info!(job_id = %id, command = %self.command_line(), "Training job launched");

        let (handle, tx) = JobHandle::pending(id.clone());
        let job_timeout = self.job_timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(job_timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    debug!(
                        job_id = %id,
                        stdout = %tail(&stdout, OUTPUT_TAIL_CHARS),
                        "Training job output"
                    );
                    if output.status.success() {
                        JobOutcome::Succeeded
                    } else {
                        let detail = tail(&stderr, OUTPUT_TAIL_CHARS).trim().to_string();
                        warn!(job_id = %id, status = %output.status, stderr = %detail, "Training job failed");
                        JobOutcome::Failed {
                            code: output.status.code(),
                            detail,
                        }
                    }
                }
                Ok(Err(e)) => JobOutcome::Failed {
                    code: None,
                    detail: e.to_string(),
                },
                Err(_) => {
                    warn!(job_id = %id, timeout_secs = job_timeout.as_secs_f64(), "Training job timed out, killed");
                    JobOutcome::Failed {
                        code: None,
                        detail: format!("timed out after {}s", job_timeout.as_secs_f64()),
                    }
                }
            };
            let _ = tx.send(outcome);
        });

        Ok(handle)
    }
}
