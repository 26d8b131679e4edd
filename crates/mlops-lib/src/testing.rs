//! Shared fixtures for unit tests

use crate::dataset::Dataset;
use crate::predictor::{ForestParams, RandomForest};
use std::fs;
use std::path::{Path, PathBuf};

/// Two-feature forest that predicts `class` for every input
pub fn constant_forest(class: u32) -> RandomForest {
    let data = Dataset {
        feature_names: vec!["a".to_string(), "b".to_string()],
        features: vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]],
        labels: vec![class; 3],
    };
    let params = ForestParams {
        n_estimators: 3,
        ..Default::default()
    };
    RandomForest::fit(&data, params).unwrap()
}

/// Stage `forest` as `<dir>/runs/<run_id>/model.json`
pub fn write_artifact(dir: &Path, run_id: &str, forest: &RandomForest) -> PathBuf {
    let run_dir = dir.join("runs").join(run_id);
    fs::create_dir_all(&run_dir).unwrap();
    let path = run_dir.join("model.json");
    fs::write(&path, forest.to_json_bytes().unwrap()).unwrap();
    path
}
