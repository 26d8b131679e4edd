//! Training and signal monitoring commands

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use mlops_lib::dataset::DEFAULT_SPLIT_SEED;
use mlops_lib::launcher::{
    JobLauncher, ProcessLauncher, SignalMonitor, DEFAULT_TRAINER_COMMAND,
};
use mlops_lib::predictor::{ForestParams, DEFAULT_FOREST_SEED, DEFAULT_N_ESTIMATORS};
use mlops_lib::registry::FileRegistry;
use mlops_lib::training::{TrainingConfig, TrainingJob, TrainingReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::output::{print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Registered model name
    #[arg(long, env = "MLOPS_MODEL_NAME", default_value = "iris-classifier")]
    pub model_name: String,

    /// Registry directory (defaults to the config file value, then ./model-registry)
    #[arg(long, env = "MLOPS_REGISTRY_ROOT")]
    pub registry_root: Option<PathBuf>,

    /// CSV dataset with a trailing integer label column; bundled iris data if omitted
    #[arg(long)]
    pub data: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_N_ESTIMATORS)]
    pub n_estimators: usize,

    /// Maximum tree depth; unlimited if omitted
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Seed for bootstrap sampling and feature selection
    #[arg(long, default_value_t = DEFAULT_FOREST_SEED)]
    pub seed: u64,

    /// Seed for the train/test split; keep it fixed so accuracies stay comparable
    #[arg(long, default_value_t = DEFAULT_SPLIT_SEED)]
    pub split_seed: u64,

    /// Fraction of samples held out for evaluation
    #[arg(long, default_value_t = 0.2)]
    pub test_fraction: f64,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Marker file written by the inference service
    #[arg(long, env = "MLOPS_SIGNAL_FILE", default_value = "./data-file/retrain_requested")]
    pub signal_file: PathBuf,

    /// Seconds between checks
    #[arg(long, default_value_t = 5)]
    pub interval_secs: u64,

    /// Command run when a signal is found
    #[arg(long, env = "MLOPS_TRAINER_COMMAND", default_value = DEFAULT_TRAINER_COMMAND)]
    pub trainer_command: String,

    /// Seconds before a training run is killed
    #[arg(long, default_value_t = 600)]
    pub job_timeout_secs: u64,
}

/// Train a candidate, register it and apply the promotion rule
pub async fn train(args: TrainArgs, registry_root: PathBuf, format: OutputFormat) -> Result<()> {
    let registry = FileRegistry::create(&registry_root)
        .with_context(|| format!("Failed to open registry at {}", registry_root.display()))?;

    let report = TrainingJob::new(training_config(args), Arc::new(registry))
        .run()
        .await
        .context("Training run failed")?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn training_config(args: TrainArgs) -> TrainingConfig {
    TrainingConfig {
        model_name: args.model_name,
        dataset_path: args.data,
        test_fraction: args.test_fraction,
        split_seed: args.split_seed,
        forest: ForestParams {
            n_estimators: args.n_estimators,
            max_depth: args.max_depth,
            seed: args.seed,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn print_report(report: &TrainingReport) {
    let heading = if report.promoted() {
        "Training Summary".green()
    } else {
        "Training Summary".yellow()
    };
    println!("{}", heading.bold());
    println!("{}", "=".repeat(50));
    println!("{}", report);
}

/// Watch for retrain signals until interrupted
pub async fn monitor(args: MonitorArgs) -> Result<()> {
    let launcher: Arc<dyn JobLauncher> = Arc::new(
        ProcessLauncher::from_command_line(&args.trainer_command)
            .context("Invalid trainer command")?
            .job_timeout(Duration::from_secs(args.job_timeout_secs)),
    );
    let monitor = SignalMonitor::new(&args.signal_file, launcher)
        .check_interval(Duration::from_secs(args.interval_secs.max(1)));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(monitor.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    task.await.context("Monitor task failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TrainCli {
        #[command(flatten)]
        args: TrainArgs,
    }

    fn parse(argv: &[&str]) -> TrainingConfig {
        let cli = TrainCli::try_parse_from(std::iter::once("train").chain(argv.iter().copied()))
            .unwrap();
        training_config(cli.args)
    }

    #[test]
    fn test_forest_seed_leaves_split_fixed() {
        let first = parse(&["--seed", "1"]);
        let second = parse(&["--seed", "2"]);

        assert_eq!(first.forest.seed, 1);
        assert_eq!(second.forest.seed, 2);
        assert_eq!(first.split_seed, DEFAULT_SPLIT_SEED);
        assert_eq!(second.split_seed, DEFAULT_SPLIT_SEED);
    }

    #[test]
    fn test_split_seed_is_separate_flag() {
        let config = parse(&["--split-seed", "7", "--n-estimators", "5"]);
        assert_eq!(config.split_seed, 7);
        assert_eq!(config.forest.seed, DEFAULT_FOREST_SEED);
        assert_eq!(config.forest.n_estimators, 5);
    }
}
