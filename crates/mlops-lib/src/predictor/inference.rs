//! A registered model version together with its deserialized classifier
//!
//! `LoadedModel` is the unit the serving process swaps. A prediction reads
//! the version metadata and the predictor from the same instance, so a
//! result is always attributable to exactly one registered version.

use super::Predictor;
use crate::models::{ModelSummary, ModelVersion};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("missing feature '{0}'")]
    Missing(String),

    #[error("feature '{0}' is not a finite number")]
    NotFinite(String),

    #[error("model rejected input: {0}")]
    Model(#[source] anyhow::Error),
}

/// Deserialized model ready for request-time inference
pub struct LoadedModel {
    version: ModelVersion,
    predictor: Box<dyn Predictor>,
    inference_count: AtomicU64,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("version", &self.version.version)
            .field("features", &self.predictor.feature_names())
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    pub fn new(version: ModelVersion, predictor: impl Predictor + 'static) -> Self {
        Self {
            version,
            predictor: Box::new(predictor),
            inference_count: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    pub fn predictor(&self) -> &dyn Predictor {
        self.predictor.as_ref()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary::from(&self.version)
    }

    /// Number of predictions served by this instance
    pub fn inference_count(&self) -> u64 {
        self.inference_count.load(Ordering::Relaxed)
    }

    /// Order named features as the model expects and classify them.
    ///
    /// Extra keys are ignored; every feature the model was trained on must
    /// be present and finite.
    pub fn predict_named(&self, features: &HashMap<String, f64>) -> Result<u32, FeatureError> {
        let names = self.predictor.feature_names();
        let mut row = Vec::with_capacity(names.len());
        for name in names {
            match features.get(name) {
                Some(v) if v.is_finite() => row.push(*v),
                Some(_) => return Err(FeatureError::NotFinite(name.clone())),
                None => return Err(FeatureError::Missing(name.clone())),
            }
        }

        let class = self.predictor.predict(&row).map_err(FeatureError::Model)?;
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        debug!(version = self.version.version, class, "Prediction computed");
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::predictor::{ForestParams, RandomForest};
    use std::collections::BTreeMap;

    fn version(n: u64) -> ModelVersion {
        ModelVersion {
            model_name: "iris-classifier".to_string(),
            version: n,
            run_id: "run".to_string(),
            metrics: BTreeMap::from([("accuracy".to_string(), 0.96)]),
            parameters: BTreeMap::new(),
            artifact_checksum: String::new(),
            created_at: 0,
        }
    }

    fn loaded() -> LoadedModel {
        let iris = Dataset::iris().unwrap();
        let params = ForestParams {
            n_estimators: 5,
            ..Default::default()
        };
        let forest = RandomForest::fit(&iris, params).unwrap();
        LoadedModel::new(version(3), forest)
    }

    /// Predictor that always refuses to classify
    struct RefusingPredictor {
        names: Vec<String>,
    }

    impl Predictor for RefusingPredictor {
        fn predict(&self, _features: &[f64]) -> anyhow::Result<u32> {
            anyhow::bail!("weights not initialised")
        }

        fn feature_names(&self) -> &[String] {
            &self.names
        }
    }

    fn setosa() -> HashMap<String, f64> {
        HashMap::from([
            ("sepal_length".to_string(), 5.1),
            ("sepal_width".to_string(), 3.5),
            ("petal_length".to_string(), 1.4),
            ("petal_width".to_string(), 0.2),
        ])
    }

    #[test]
    fn test_predict_named_orders_features() {
        let model = loaded();
        assert_eq!(model.predict_named(&setosa()).unwrap(), 0);
        assert_eq!(model.inference_count(), 1);
        assert_eq!(model.summary().version, 3);
        assert_eq!(model.summary().accuracy, Some(0.96));
    }

    #[test]
    fn test_predict_named_ignores_extra_keys() {
        let model = loaded();
        let mut features = setosa();
        features.insert("colour".to_string(), 1.0);
        assert!(model.predict_named(&features).is_ok());
    }

    #[test]
    fn test_predict_named_rejects_missing_and_non_finite() {
        let model = loaded();

        let mut missing = setosa();
        missing.remove("petal_width");
        assert!(matches!(
            model.predict_named(&missing),
            Err(FeatureError::Missing(name)) if name == "petal_width"
        ));

        let mut nan = setosa();
        nan.insert("sepal_length".to_string(), f64::NAN);
        assert!(matches!(model.predict_named(&nan), Err(FeatureError::NotFinite(_))));
        assert_eq!(model.inference_count(), 0);
    }

    #[test]
    fn test_predictor_errors_surface_as_model_errors() {
        let model = LoadedModel::new(
            version(1),
            RefusingPredictor {
                names: vec!["a".to_string()],
            },
        );
        assert_eq!(model.predictor().feature_names(), ["a".to_string()]);

        let features = HashMap::from([("a".to_string(), 1.0)]);
        let err = model.predict_named(&features).unwrap_err();
        assert!(matches!(err, FeatureError::Model(_)));
        assert!(err.to_string().contains("weights not initialised"));
        assert_eq!(model.inference_count(), 0);
    }
}
