//! MLOps CLI
//!
//! Runs training jobs and the retrain signal monitor, lists the local model
//! registry, and queries a running inference service.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{models, serving, train};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_REGISTRY_ROOT: &str = "./model-registry";

/// MLOps model promotion and inference CLI
#[derive(Parser)]
#[command(name = "mlops")]
#[command(author, version, about = "CLI for MLOps model training, promotion and inference", long_about = None)]
pub struct Cli {
    /// Inference service URL (can also be set via MLOPS_API_URL env var)
    #[arg(long, env = "MLOPS_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model, register it and apply the promotion rule
    Train(train::TrainArgs),

    /// Watch for retrain signal files and launch training
    Monitor(train::MonitorArgs),

    /// List registered model versions and aliases
    Models {
        /// Registered model name
        #[arg(long, env = "MLOPS_MODEL_NAME", default_value = "iris-classifier")]
        model_name: String,

        /// Registry directory
        #[arg(long, env = "MLOPS_REGISTRY_ROOT")]
        registry_root: Option<PathBuf>,
    },

    /// Request a prediction from the inference service
    Predict {
        /// Feature value as name=value (repeatable)
        #[arg(long = "feature", short = 'x', value_parser = serving::parse_feature)]
        features: Vec<(String, f64)>,
    },

    /// Trigger retraining through the inference service
    Retrain,

    /// Show registry information for the served model
    Info,

    /// Show inference service health
    Health,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let user_config = config::Config::load()?;
    let registry_root = |flag: Option<PathBuf>| {
        flag.or_else(|| user_config.registry_root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_ROOT))
    };
    let api_client = || client::ApiClient::new(&user_config.resolve_api_url(cli.api_url.clone()));

    match cli.command {
        Commands::Train(args) => {
            init_logging(cli.verbose);
            let root = registry_root(args.registry_root.clone());
            train::train(args, root, cli.format).await?;
        }
        Commands::Monitor(args) => {
            init_logging(cli.verbose);
            train::monitor(args).await?;
        }
        Commands::Models {
            model_name,
            registry_root: root,
        } => {
            models::list_models(&model_name, registry_root(root), cli.format).await?;
        }
        Commands::Predict { features } => {
            serving::predict(&api_client()?, features, cli.format).await?;
        }
        Commands::Retrain => serving::retrain(&api_client()?, cli.format).await?,
        Commands::Info => serving::info(&api_client()?, cli.format).await?,
        Commands::Health => serving::health(&api_client()?, cli.format).await?,
    }

    Ok(())
}
