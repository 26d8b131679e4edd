//! Service configuration

use anyhow::{Context, Result};
use mlops_lib::launcher::{
    JobLauncher, LaunchError, ProcessLauncher, SignalFileLauncher, DEFAULT_TRAINER_COMMAND,
};
use mlops_lib::serving::ServingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "MLOPS_CONFIG_FILE";

/// How `/retrain` reaches the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Spawn `trainer_command` directly
    Process,
    /// Write `signal_file` for `mlops monitor` to pick up
    SignalFile,
}

/// Inference service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Directory holding the model registry
    #[serde(default = "default_registry_root")]
    pub registry_root: PathBuf,

    /// Seconds a retrain waits for its job before reloading
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_secs: u64,

    /// Seconds before a training job is killed and counted as failed
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_launcher")]
    pub launcher: LauncherKind,

    #[serde(default = "default_trainer_command")]
    pub trainer_command: String,

    #[serde(default = "default_signal_file")]
    pub signal_file: PathBuf,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_api_port() -> u16 {
    8000
}

fn default_model_name() -> String {
    "iris-classifier".to_string()
}

fn default_registry_root() -> PathBuf {
    PathBuf::from("./model-registry")
}

fn default_reload_timeout() -> u64 {
    60
}

fn default_job_timeout() -> u64 {
    600
}

fn default_launcher() -> LauncherKind {
    LauncherKind::Process
}

fn default_trainer_command() -> String {
    DEFAULT_TRAINER_COMMAND.to_string()
}

fn default_signal_file() -> PathBuf {
    PathBuf::from("./data-file/retrain_requested")
}

fn default_service_name() -> String {
    "inference-service".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            model_name: default_model_name(),
            registry_root: default_registry_root(),
            reload_timeout_secs: default_reload_timeout(),
            job_timeout_secs: default_job_timeout(),
            launcher: default_launcher(),
            trainer_command: default_trainer_command(),
            signal_file: default_signal_file(),
            service_name: default_service_name(),
        }
    }
}

impl ServiceConfig {
    /// Load from the optional config file and `MLOPS_*` environment variables
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load with an explicit config file; environment variables override it
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("MLOPS"))
            .build()
            .context("Failed to read service configuration")?;

        config
            .try_deserialize()
            .context("Invalid service configuration")
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn serving(&self) -> ServingConfig {
        ServingConfig {
            model_name: self.model_name.clone(),
            reload_timeout: self.reload_timeout(),
            job_timeout: self.job_timeout(),
            service_name: self.service_name.clone(),
        }
    }

    /// Build the configured job launcher
    pub fn launcher(&self) -> Result<Arc<dyn JobLauncher>, LaunchError> {
        Ok(match self.launcher {
            LauncherKind::Process => {
                Arc::new(
                    ProcessLauncher::from_command_line(&self.trainer_command)?
                        .job_timeout(self.job_timeout()),
                )
            }
            LauncherKind::SignalFile => Arc::new(SignalFileLauncher::new(&self.signal_file)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.model_name, "iris-classifier");
        assert_eq!(config.reload_timeout(), Duration::from_secs(60));
        assert_eq!(config.serving().job_timeout, Duration::from_secs(600));
        assert_eq!(config.launcher, LauncherKind::Process);
        assert_eq!(config.trainer_command, "mlops train");
        assert!(config.launcher().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("service.toml");
        std::fs::write(
            &path,
            "api_port = 9100\nlauncher = \"signal_file\"\nsignal_file = \"/tmp/retrain\"\nreload_timeout_secs = 5\njob_timeout_secs = 120\n",
        )
        .unwrap();

        let config = ServiceConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.launcher, LauncherKind::SignalFile);
        assert_eq!(config.signal_file, PathBuf::from("/tmp/retrain"));
        assert_eq!(config.serving().reload_timeout, Duration::from_secs(5));
        assert_eq!(config.serving().job_timeout, Duration::from_secs(120));
        assert_eq!(config.model_name, "iris-classifier");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(ServiceConfig::load_from(Some(&temp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_empty_trainer_command_rejected() {
        let config = ServiceConfig {
            trainer_command: " ".to_string(),
            ..Default::default()
        };
        assert!(config.launcher().is_err());
    }
}
