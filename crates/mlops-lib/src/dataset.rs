//! Tabular classification datasets
//!
//! Loads the bundled Iris dataset or a CSV file whose last column is the
//! integer class label, and produces the deterministic train/test split
//! used by the training job.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Bundled Iris dataset (150 samples, 4 features, 3 classes)
const IRIS_CSV: &str = include_str!("../data/iris.csv");

/// Fraction of samples held out for scoring
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Seed for the train/test split. Held constant so repeated runs on the
/// same data produce comparable accuracy numbers.
pub const DEFAULT_SPLIT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset has no header row")]
    MissingHeader,

    #[error("dataset needs at least one feature column and a label column")]
    TooFewColumns,

    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount { line: usize, expected: usize, found: usize },

    #[error("line {line}: invalid value '{value}'")]
    InvalidValue { line: usize, value: String },

    #[error("dataset contains no samples")]
    Empty,

    #[error("test fraction {0} must be within (0, 1)")]
    InvalidTestFraction(f64),

    #[error("dataset of {0} samples is too small to split")]
    TooSmallToSplit(usize),
}

/// Feature matrix with integer class labels
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u32>,
}

/// Train and test partitions of one dataset
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
}

impl Dataset {
    /// The bundled Iris dataset
    pub fn iris() -> Result<Self, DatasetError> {
        Self::parse_csv(IRIS_CSV)
    }

    /// Load a dataset from a CSV file
    pub fn from_csv_file(path: &Path) -> Result<Self, DatasetError> {
        let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_csv(&content)
    }

    /// Parse CSV text: header of feature names plus a trailing label column
    pub fn parse_csv(content: &str) -> Result<Self, DatasetError> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let (_, header) = lines.next().ok_or(DatasetError::MissingHeader)?;
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
        if columns.len() < 2 {
            return Err(DatasetError::TooFewColumns);
        }
        let feature_names = columns[..columns.len() - 1].to_vec();

        let mut features = Vec::new();
        let mut labels = Vec::new();

        for (idx, line) in lines {
            let line_no = idx + 1;
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() != columns.len() {
                return Err(DatasetError::ColumnCount {
                    line: line_no,
                    expected: columns.len(),
                    found: cells.len(),
                });
            }

            let (label_cell, feature_cells) = cells.split_last().ok_or(DatasetError::TooFewColumns)?;
            let row = feature_cells
                .iter()
                .map(|cell| parse_feature(cell, line_no))
                .collect::<Result<Vec<f64>, _>>()?;
            let label = label_cell
                .parse::<u32>()
                .map_err(|_| DatasetError::InvalidValue {
                    line: line_no,
                    value: label_cell.to_string(),
                })?;

            features.push(row);
            labels.push(label);
        }

        if features.is_empty() {
            return Err(DatasetError::Empty);
        }

        Ok(Self {
            feature_names,
            features,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Number of classes, assuming labels are `0..n`
    pub fn n_classes(&self) -> usize {
        self.labels.iter().max().map(|m| *m as usize + 1).unwrap_or(0)
    }

    /// Shuffle with a seeded RNG and hold out `test_fraction` of the samples.
    ///
    /// The same seed and data always yield the same partition.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> Result<Split, DatasetError> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(DatasetError::InvalidTestFraction(test_fraction));
        }
        let n = self.len();
        let n_test = ((n as f64) * test_fraction).round() as usize;
        if n < 2 || n_test == 0 || n_test >= n {
            return Err(DatasetError::TooSmallToSplit(n));
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let (test_idx, train_idx) = indices.split_at(n_test);
        Ok(Split {
            train: self.subset(train_idx),
            test: self.subset(test_idx),
        })
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            feature_names: self.feature_names.clone(),
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

fn parse_feature(cell: &str, line: usize) -> Result<f64, DatasetError> {
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DatasetError::InvalidValue {
            line,
            value: cell.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_iris_shape() {
        let iris = Dataset::iris().unwrap();
        assert_eq!(iris.len(), 150);
        assert_eq!(iris.n_features(), 4);
        assert_eq!(iris.n_classes(), 3);
        assert_eq!(
            iris.feature_names,
            vec!["sepal_length", "sepal_width", "petal_length", "petal_width"]
        );
        for class in 0..3 {
            assert_eq!(iris.labels.iter().filter(|&&l| l == class).count(), 50);
        }
    }

    #[test]
    fn test_split_sizes_match_sklearn_convention() {
        let iris = Dataset::iris().unwrap();
        let split = iris.train_test_split(DEFAULT_TEST_FRACTION, DEFAULT_SPLIT_SEED).unwrap();
        assert_eq!(split.test.len(), 30);
        assert_eq!(split.train.len(), 120);
    }

    #[test]
    fn test_split_is_deterministic_for_fixed_seed() {
        let iris = Dataset::iris().unwrap();
        let a = iris.train_test_split(0.2, 42).unwrap();
        let b = iris.train_test_split(0.2, 42).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);

        let c = iris.train_test_split(0.2, 7).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let iris = Dataset::iris().unwrap();
        assert!(matches!(
            iris.train_test_split(0.0, 42),
            Err(DatasetError::InvalidTestFraction(_))
        ));
        assert!(iris.train_test_split(1.0, 42).is_err());
    }

    #[test]
    fn test_parse_csv_errors() {
        assert!(matches!(Dataset::parse_csv(""), Err(DatasetError::MissingHeader)));
        assert!(matches!(
            Dataset::parse_csv("a,label\n"),
            Err(DatasetError::Empty)
        ));
        assert!(matches!(
            Dataset::parse_csv("a,b,label\n1.0,2.0\n"),
            Err(DatasetError::ColumnCount { line: 2, .. })
        ));
        assert!(matches!(
            Dataset::parse_csv("a,label\nfoo,1\n"),
            Err(DatasetError::InvalidValue { .. })
        ));
        assert!(matches!(
            Dataset::parse_csv("a,label\n1.0,-1\n"),
            Err(DatasetError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_from_csv_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "x,y,label\n0.0,1.0,0\n1.0,0.0,1\n\n").unwrap();

        let ds = Dataset::from_csv_file(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.feature_names, vec!["x", "y"]);
        assert_eq!(ds.labels, vec![0, 1]);

        let missing = Dataset::from_csv_file(&dir.path().join("missing.csv"));
        assert!(matches!(missing, Err(DatasetError::Io { .. })));
    }
}
