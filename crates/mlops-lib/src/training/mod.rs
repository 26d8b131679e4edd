//! Training job
//!
//! One run loads the dataset, fits a forest, scores it on the held-out
//! split, registers it as a new version and binds either `production` or
//! `challenger` to it. The promotion decision always reads the production
//! accuracy from the registry at decision time, so concurrent runs each
//! compare against whatever is current when they finish.

use crate::dataset::{Dataset, DatasetError, DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION};
use crate::models::{Alias, ACCURACY_METRIC};
use crate::observability::StructuredLogger;
use crate::predictor::{ForestError, ForestParams, RandomForest};
use crate::promotion::{decide_promotion, PromotionError};
use crate::registry::{ModelRegistry, RegistryError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};


pub const DEFAULT_MODEL_NAME: &str = "iris-classifier";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to load training data: {0}")]
    Dataset(#[from] DatasetError),

    #[error("failed to fit model: {0}")]
    Fit(#[from] ForestError),

    #[error("failed to stage artifact at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register model version: {0}")]
    Registration(#[source] RegistryError),

    #[error("failed to look up production model: {0}")]
    ProductionLookup(#[source] RegistryError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    /// The version is registered but holds no alias
    #[error("version {version} registered but alias '{alias}' was not updated: {source}")]
    AliasUpdate {
        version: u64,
        alias: Alias,
        #[source]
        source: RegistryError,
    },
}

/// Settings for one training run
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub model_name: String,
    /// CSV to train on; the bundled iris data when unset
    pub dataset_path: Option<PathBuf>,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
    /// Scratch directory for artifacts before registration
    pub staging_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            dataset_path: None,
            test_fraction: DEFAULT_TEST_FRACTION,
            split_seed: DEFAULT_SPLIT_SEED,
            forest: ForestParams::default(),
            staging_dir: std::env::temp_dir().join("mlops-runs"),
        }
    }
}

/// A fitted model with its evaluation, not yet registered
#[derive(Debug, Clone)]
pub struct FittedCandidate {
    pub run_id: String,
    pub forest: RandomForest,
    pub accuracy: f64,
    pub parameters: BTreeMap<String, String>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub model_name: String,
    pub run_id: String,
    pub version: u64,
    pub accuracy: f64,
    pub production_accuracy: Option<f64>,
    pub alias: Alias,
    /// Production version before this run
    pub previous_production: Option<u64>,
}

impl TrainingReport {
    pub fn promoted(&self) -> bool {
        self.alias == Alias::Production
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model:            {}", self.model_name)?;
        writeln!(f, "Run ID:           {}", self.run_id)?;
        writeln!(f, "Version:          {}", self.version)?;
        writeln!(f, "Accuracy:         {:.4}", self.accuracy)?;
        match self.production_accuracy {
            Some(acc) => writeln!(f, "Production:       {:.4}", acc)?,
            None => writeln!(f, "Production:       none")?,
        }
        if self.promoted() {
            write!(f, "Result:           promoted to production")
        } else {
            write!(
                f,
                "Result:           kept as challenger (did not beat production)"
            )
        }
    }
}

/// Fits, evaluates and publishes model candidates
pub struct TrainingJob {
    config: TrainingConfig,
    registry: Arc<dyn ModelRegistry>,
    logger: StructuredLogger,
}

impl TrainingJob {
    pub fn new(config: TrainingConfig, registry: Arc<dyn ModelRegistry>) -> Self {
        Self {
            config,
            registry,
            logger: StructuredLogger::new("trainer"),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train, register and promote in one go
    pub async fn run(&self) -> Result<TrainingReport, TrainingError> {
        let candidate = self.fit()?;
        self.publish(candidate).await
    }

    /// Load data, fit the forest and score it on the held-out split
    pub fn fit(&self) -> Result<FittedCandidate, TrainingError> {
        let dataset = match &self.config.dataset_path {
            Some(path) => Dataset::from_csv_file(path)?,
            None => Dataset::iris()?,
        };
        let split = dataset.train_test_split(self.config.test_fraction, self.config.split_seed)?;

        info!(
            model = %self.config.model_name,
            train_samples = split.train.len(),
            test_samples = split.test.len(),
            n_estimators = self.config.forest.n_estimators,
            "Fitting model"
        );

        let forest = RandomForest::fit(&split.train, self.config.forest)?;
        let accuracy = forest.accuracy(&split.test)?;

        let params = &self.config.forest;
        let parameters = BTreeMap::from([
            ("n_estimators".to_string(), params.n_estimators.to_string()),
            (
                "max_depth".to_string(),
                params
                    .max_depth
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            ("seed".to_string(), params.seed.to_string()),
            ("split_seed".to_string(), self.config.split_seed.to_string()),
            ("train_samples".to_string(), split.train.len().to_string()),
            ("test_samples".to_string(), split.test.len().to_string()),
        ]);

        let run_id = generate_run_id(&self.config.model_name);
        debug!(run_id = %run_id, accuracy = accuracy, "Candidate evaluated");

        Ok(FittedCandidate {
            run_id,
            forest,
            accuracy,
            parameters,
        })
    }

    /// Register `candidate` and bind the alias it earned
    pub async fn publish(&self, candidate: FittedCandidate) -> Result<TrainingReport, TrainingError> {
        let model_name = self.config.model_name.as_str();

        let run_dir = self.config.staging_dir.join(&candidate.run_id);
        let artifact_path = run_dir.join("model.json");
        let bytes = candidate.forest.to_json_bytes()?;
        fs::create_dir_all(&run_dir)
            .and_then(|_| fs::write(&artifact_path, &bytes))
            .map_err(|source| TrainingError::Artifact {
                path: artifact_path.clone(),
                source,
            })?;

        let metrics = BTreeMap::from([(ACCURACY_METRIC.to_string(), candidate.accuracy)]);
        let registered = self
            .registry
            .register_version(model_name, &artifact_path, metrics, candidate.parameters)
            .await;

        if let Err(e) = fs::remove_dir_all(&run_dir) {
            warn!(path = %run_dir.display(), error = %e, "Failed to clean staging directory");
        }
        let version = registered.map_err(TrainingError::Registration)?;

        let production = self
            .registry
            .get_alias_version(model_name, Alias::Production)
            .await
            .map_err(TrainingError::ProductionLookup)?;
        let production_accuracy = production.as_ref().and_then(|p| p.accuracy());

        let alias = decide_promotion(candidate.accuracy, production_accuracy)?;

        self.registry
            .set_alias(model_name, alias, version.version)
            .await
            .map_err(|source| TrainingError::AliasUpdate {
                version: version.version,
                alias,
                source,
            })?;

        self.logger.log_training_summary(
            model_name,
            version.version,
            candidate.accuracy,
            production_accuracy,
            alias,
        );

        Ok(TrainingReport {
            model_name: model_name.to_string(),
            run_id: candidate.run_id,
            version: version.version,
            accuracy: candidate.accuracy,
            production_accuracy,
            alias,
            previous_production: production.map(|p| p.version),
        })
    }
}

/// 32 hex chars derived from the model name, current time and process id
pub fn generate_run_id(model_name: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}
