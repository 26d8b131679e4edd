//! Random forest classifier
//!
//! CART trees grown on bootstrap samples with gini impurity and a random
//! subset of `sqrt(n_features)` candidate features per split. Everything is
//! driven by one seeded RNG, so fitting the same data with the same
//! parameters yields the same forest. The fitted forest serializes to JSON,
//! which is the artifact stored in the registry.

use super::Predictor;
use crate::dataset::Dataset;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_N_ESTIMATORS: usize = 50;
pub const DEFAULT_FOREST_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("cannot fit a forest on an empty dataset")]
    EmptyDataset,

    #[error("n_estimators must be at least 1")]
    NoEstimators,

    #[error("min_samples_split must be at least 2")]
    InvalidMinSamplesSplit,

    #[error("sample has {found} features, model expects {expected}")]
    FeatureCount { expected: usize, found: usize },

    #[error("malformed forest artifact: {0}")]
    Malformed(String),

    #[error("failed to decode forest artifact: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Hyperparameters for fitting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// `None` grows trees until leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_depth: None,
            min_samples_split: 2,
            seed: DEFAULT_FOREST_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        class: u32,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Single CART tree stored as a node arena rooted at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict(&self, sample: &[f64]) -> u32 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if sample[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Children must point strictly forward, which also rules out cycles
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), ForestError> {
        if self.nodes.is_empty() {
            return Err(ForestError::Malformed("tree has no nodes".to_string()));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { class } => {
                    if *class as usize >= n_classes {
                        return Err(ForestError::Malformed(format!(
                            "leaf {} predicts class {} of {}",
                            idx, class, n_classes
                        )));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features || !threshold.is_finite() {
                        return Err(ForestError::Malformed(format!("split {} is invalid", idx)));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(ForestError::Malformed(format!(
                                "split {} points to node {}",
                                idx, child
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ensemble of decision trees voting on the class label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    feature_names: Vec<String>,
    n_classes: usize,
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on `data`
    pub fn fit(data: &Dataset, params: ForestParams) -> Result<Self, ForestError> {
        if data.is_empty() {
            return Err(ForestError::EmptyDataset);
        }
        if params.n_estimators == 0 {
            return Err(ForestError::NoEstimators);
        }
        if params.min_samples_split < 2 {
            return Err(ForestError::InvalidMinSamplesSplit);
        }

        let n = data.len();
        let n_classes = data.n_classes();
        let max_features = ((data.n_features() as f64).sqrt().round() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder {
                    data,
                    n_classes,
                    max_features,
                    params: &params,
                    rng: &mut rng,
                    nodes: Vec::new(),
                };
                builder.grow(&sample, 0);
                DecisionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();

        Ok(Self {
            feature_names: data.feature_names.clone(),
            n_classes,
            params,
            trees,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(DecisionTree::depth).max().unwrap_or(0)
    }

    /// Majority vote; ties go to the lowest class index
    pub fn classify(&self, sample: &[f64]) -> Result<u32, ForestError> {
        if sample.len() != self.feature_names.len() {
            return Err(ForestError::FeatureCount {
                expected: self.feature_names.len(),
                found: sample.len(),
            });
        }

        let mut votes = vec![0usize; self.n_classes.max(1)];
        for tree in &self.trees {
            votes[tree.predict(sample) as usize] += 1;
        }

        let mut best = 0;
        for (class, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = class;
            }
        }
        Ok(best as u32)
    }

    /// Fraction of correctly classified samples
    pub fn accuracy(&self, data: &Dataset) -> Result<f64, ForestError> {
        if data.is_empty() {
            return Err(ForestError::EmptyDataset);
        }
        let mut correct = 0usize;
        for (sample, &label) in data.features.iter().zip(&data.labels) {
            if self.classify(sample)? == label {
                correct += 1;
            }
        }
        Ok(correct as f64 / data.len() as f64)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ForestError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and structurally validate an artifact
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ForestError> {
        let forest: RandomForest = serde_json::from_slice(bytes)?;
        if forest.trees.is_empty() {
            return Err(ForestError::Malformed("forest has no trees".to_string()));
        }
        if forest.feature_names.is_empty() || forest.n_classes == 0 {
            return Err(ForestError::Malformed("forest has no features or classes".to_string()));
        }
        for tree in &forest.trees {
            tree.validate(forest.feature_names.len(), forest.n_classes)?;
        }
        Ok(forest)
    }
}

impl Predictor for RandomForest {
    fn predict(&self, features: &[f64]) -> Result<u32> {
        Ok(self.classify(features)?)
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

struct TreeBuilder<'a> {
    data: &'a Dataset,
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `indices` and return its node index
    fn grow(&mut self, indices: &[usize], depth: usize) -> usize {
        let counts = self.class_counts(indices);
        let majority = argmax(&counts);
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { class: majority });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.map(|d| depth >= d).unwrap_or(false);
        if pure || depth_reached || indices.len() < self.params.min_samples_split {
            return idx;
        }

        let Some(split) = self.find_split(indices) else {
            return idx;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.data.features[i][split.feature] <= split.threshold);
        if left_idx.is_empty() || right_idx.is_empty() {
            return idx;
        }

        let left = self.grow(&left_idx, depth + 1);
        let right = self.grow(&right_idx, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Best gini split over a random feature subset. Like CART, the search
    /// keeps going past `max_features` until at least one valid split exists.
    fn find_split(&mut self, indices: &[usize]) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.data.n_features()).collect();
        features.shuffle(&mut *self.rng);

        let mut best: Option<BestSplit> = None;
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            if let Some(candidate) = self.best_split_on(feature, indices) {
                if best.as_ref().map(|b| candidate.impurity < b.impurity).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn best_split_on(&self, feature: usize, indices: &[usize]) -> Option<BestSplit> {
        let mut values: Vec<(f64, u32)> = indices
            .iter()
            .map(|&i| (self.data.features[i][feature], self.data.labels[i]))
            .collect();
        values.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total = values.len();
        let mut right = vec![0usize; self.n_classes];
        for (_, label) in &values {
            right[*label as usize] += 1;
        }
        let mut left = vec![0usize; self.n_classes];

        let mut best: Option<BestSplit> = None;
        for pos in 0..total - 1 {
            let (value, label) = values[pos];
            left[label as usize] += 1;
            right[label as usize] -= 1;

            let next = values[pos + 1].0;
            if next <= value {
                continue;
            }

            let n_left = pos + 1;
            let n_right = total - n_left;
            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / total as f64;

            if best.as_ref().map(|b| impurity < b.impurity).unwrap_or(true) {
                let mid = value + (next - value) / 2.0;
                let threshold = if mid < next { mid } else { value };
                best = Some(BestSplit {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }

    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.data.labels[i] as usize] += 1;
        }
        counts
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn argmax(counts: &[usize]) -> u32 {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best as u32
}
