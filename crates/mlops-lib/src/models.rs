//! Core data models shared by the training job, the registry and the serving process

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metric every registered version must carry
pub const ACCURACY_METRIC: &str = "accuracy";

/// Named, rebindable pointer from a model name to one registered version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alias {
    /// Version used for live predictions
    Production,
    /// Most recent version that did not supersede production
    Challenger,
}

impl Alias {
    pub const ALL: [Alias; 2] = [Alias::Production, Alias::Challenger];

    pub fn as_str(&self) -> &'static str {
        match self {
            Alias::Production => "production",
            Alias::Challenger => "challenger",
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Alias::Production),
            "challenger" => Ok(Alias::Challenger),
            other => Err(format!("unknown alias '{}'", other)),
        }
    }
}

/// One registered artifact produced by a training run.
///
/// Written once by the registry and never mutated; aliases point at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: u64,
    pub run_id: String,
    pub metrics: BTreeMap<String, f64>,
    pub parameters: BTreeMap<String, String>,
    pub artifact_checksum: String,
    pub created_at: i64,
}

impl ModelVersion {
    /// Recorded test accuracy, if the version carries one
    pub fn accuracy(&self) -> Option<f64> {
        self.metrics.get(ACCURACY_METRIC).copied()
    }
}

/// Identifying information about a loaded model, reported by `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub version: u64,
    pub run_id: String,
    pub accuracy: Option<f64>,
}

impl From<&ModelVersion> for ModelSummary {
    fn from(v: &ModelVersion) -> Self {
        Self {
            version: v.version,
            run_id: v.run_id.clone(),
            accuracy: v.accuracy(),
        }
    }
}

/// Result of a single prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: u32,
    pub model_version: u64,
}

/// Registry view served by `/model/info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub loaded_version: Option<u64>,
    pub production: Option<ModelVersion>,
    pub total_versions: usize,
    pub aliases: BTreeMap<Alias, u64>,
}

/// Acknowledgement returned by `/retrain`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainAck {
    pub status: String,
    pub message: String,
    pub trigger_id: String,
    pub coalesced: bool,
}
