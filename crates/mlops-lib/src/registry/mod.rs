//! Model registry client
//!
//! The registry is the only component allowed to read or write model
//! versions and alias bindings. It is the source of truth shared by the
//! training job and the serving process, so callers re-query it instead of
//! keeping local copies of alias state.

mod file;

pub use file::FileRegistry;

use crate::models::{Alias, ModelVersion};
use crate::predictor::LoadedModel;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Backing store unreachable; transient, surfaced to the caller
    #[error("model registry unavailable: {0}")]
    Unavailable(String),

    #[error("invalid model artifact at {location}: {reason}")]
    InvalidArtifact { location: String, reason: String },

    #[error("metrics for model '{0}' do not include accuracy")]
    MissingAccuracy(String),

    /// Alias never set; expected before the first training run completes
    #[error("no version of model '{model_name}' holds alias '{alias}'")]
    ModelNotFound { model_name: String, alias: Alias },

    #[error("model '{model_name}' has no version {version}")]
    VersionNotFound { model_name: String, version: u64 },

    #[error("artifact for model '{model_name}' version {version} is corrupt: {reason}")]
    ArtifactCorrupt {
        model_name: String,
        version: u64,
        reason: String,
    },
}

impl RegistryError {
    /// True for the cold-start condition of no model being bound yet
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::ModelNotFound { .. })
    }
}

/// Operations on the external model registry
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register a new immutable version from an artifact on disk
    async fn register_version(
        &self,
        model_name: &str,
        artifact_location: &Path,
        metrics: BTreeMap<String, f64>,
        parameters: BTreeMap<String, String>,
    ) -> Result<ModelVersion, RegistryError>;

    /// Version currently bound to `alias`, or `None` if the alias is unset
    async fn get_alias_version(
        &self,
        model_name: &str,
        alias: Alias,
    ) -> Result<Option<ModelVersion>, RegistryError>;

    /// Rebind `alias` to `version`, replacing any previous binding
    async fn set_alias(&self, model_name: &str, alias: Alias, version: u64)
        -> Result<(), RegistryError>;

    /// Resolve `alias` and deserialize its artifact into a predictor
    async fn load_model(&self, model_name: &str, alias: Alias)
        -> Result<LoadedModel, RegistryError>;

    /// All completed registrations in ascending version order
    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError>;

    /// Current alias bindings
    async fn aliases(&self, model_name: &str) -> Result<BTreeMap<Alias, u64>, RegistryError>;
}
