//! Classifier and loaded-model types

mod forest;
mod inference;

pub use forest::{
    DecisionTree, ForestError, ForestParams, RandomForest, DEFAULT_FOREST_SEED,
    DEFAULT_N_ESTIMATORS,
};
pub use inference::{FeatureError, LoadedModel};

use anyhow::Result;

/// Trait for prediction implementations
pub trait Predictor: Send + Sync {
    /// Predict the class for one ordered feature vector
    fn predict(&self, features: &[f64]) -> Result<u32>;

    /// Feature names in the order `predict` expects them
    fn feature_names(&self) -> &[String];
}
