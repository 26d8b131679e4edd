//! Filesystem-backed model registry
//!
//! Layout under the registry root:
//!
//! ```text
//! <root>/<model>/versions/<n>/model.json   artifact
//! <root>/<model>/versions/<n>/meta.json    version record, written last
//! <root>/<model>/aliases/<alias>           bound version number
//! ```
//!
//! Version numbers are claimed with an exclusive `create_dir`, so concurrent
//! training jobs never share one. A version directory without `meta.json`
//! is an interrupted registration: its number stays consumed but it is not
//! listed. Every file is written to a temp file and renamed into place, so
//! readers see either the old or the new content. Nothing is cached; each
//! call reads the store again.

use super::{ModelRegistry, RegistryError};
use crate::models::{Alias, ModelVersion, ACCURACY_METRIC};
use crate::predictor::{LoadedModel, RandomForest};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ARTIFACT_FILE: &str = "model.json";
const META_FILE: &str = "meta.json";

/// Model registry stored in a local or mounted directory
#[derive(Debug, Clone)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    /// Open a registry rooted at `root` without touching the filesystem.
    ///
    /// Operations fail with `Unavailable` while the root does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a registry, creating the root directory if needed
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let registry = Self::new(root);
        fs::create_dir_all(&registry.root).map_err(|e| {
            RegistryError::Unavailable(format!(
                "failed to create registry root {}: {}",
                registry.root.display(),
                e
            ))
        })?;
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_reachable(&self) -> Result<(), RegistryError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RegistryError::Unavailable(format!(
                "registry root {} is not a directory",
                self.root.display()
            )))
        }
    }

    fn model_dir(&self, model_name: &str) -> Result<PathBuf, RegistryError> {
        let valid = !model_name.is_empty()
            && model_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !model_name.starts_with('.');
        if !valid {
            return Err(RegistryError::Unavailable(format!(
                "invalid model name '{}'",
                model_name
            )));
        }
        self.ensure_reachable()?;
        Ok(self.root.join(model_name))
    }

    fn version_dir(model_dir: &Path, version: u64) -> PathBuf {
        model_dir.join("versions").join(version.to_string())
    }

    fn alias_path(model_dir: &Path, alias: Alias) -> PathBuf {
        model_dir.join("aliases").join(alias.as_str())
    }

    /// Highest version number ever claimed, complete or not
    fn highest_claimed(versions_dir: &Path) -> Result<u64, RegistryError> {
        let entries = match fs::read_dir(versions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(unavailable("list versions", versions_dir, e)),
        };

        let mut highest = 0;
        for entry in entries {
            let entry = entry.map_err(|e| unavailable("list versions", versions_dir, e))?;
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                highest = highest.max(n);
            }
        }
        Ok(highest)
    }

    fn claim_version(model_dir: &Path) -> Result<(u64, PathBuf), RegistryError> {
        let versions_dir = model_dir.join("versions");
        fs::create_dir_all(&versions_dir)
            .map_err(|e| unavailable("create versions directory", &versions_dir, e))?;

        loop {
            let candidate = Self::highest_claimed(&versions_dir)? + 1;
            let dir = Self::version_dir(model_dir, candidate);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((candidate, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(version = candidate, "Version number taken, retrying");
                }
                Err(e) => return Err(unavailable("claim version", &dir, e)),
            }
        }
    }

    fn read_meta(
        model_dir: &Path,
        model_name: &str,
        version: u64,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        let path = Self::version_dir(model_dir, version).join(META_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable("read version record", &path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RegistryError::ArtifactCorrupt {
                model_name: model_name.to_string(),
                version,
                reason: format!("unreadable version record: {}", e),
            })
    }

    fn read_alias(model_dir: &Path, alias: Alias) -> Result<Option<u64>, RegistryError> {
        let path = Self::alias_path(model_dir, alias);
        match fs::read_to_string(&path) {
            Ok(content) => content.trim().parse::<u64>().map(Some).map_err(|_| {
                RegistryError::Unavailable(format!(
                    "alias file {} holds '{}', not a version number",
                    path.display(),
                    content.trim()
                ))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable("read alias", &path, e)),
        }
    }

    /// The run id is the artifact's parent directory name
    /// (`<runs>/<run_id>/model.json`), falling back to the checksum prefix.
    fn run_id_for(artifact_location: &Path, checksum: &str) -> String {
        artifact_location
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| checksum[..32].to_string())
    }
}

#[async_trait]
impl ModelRegistry for FileRegistry {
    async fn register_version(
        &self,
        model_name: &str,
        artifact_location: &Path,
        metrics: BTreeMap<String, f64>,
        parameters: BTreeMap<String, String>,
    ) -> Result<ModelVersion, RegistryError> {
        let model_dir = self.model_dir(model_name)?;

        if !metrics.contains_key(ACCURACY_METRIC) {
            return Err(RegistryError::MissingAccuracy(model_name.to_string()));
        }

        let invalid = |reason: String| RegistryError::InvalidArtifact {
            location: artifact_location.display().to_string(),
            reason,
        };
        let weights = fs::read(artifact_location).map_err(|e| invalid(e.to_string()))?;
        RandomForest::from_json_slice(&weights).map_err(|e| invalid(e.to_string()))?;

        let checksum = compute_checksum(&weights);
        let (version, dir) = Self::claim_version(&model_dir)?;

        let artifact_path = dir.join(ARTIFACT_FILE);
        write_atomic(&artifact_path, &weights)
            .map_err(|e| unavailable("store artifact", &artifact_path, e))?;

        let record = ModelVersion {
            model_name: model_name.to_string(),
            version,
            run_id: Self::run_id_for(artifact_location, &checksum),
            metrics,
            parameters,
            artifact_checksum: checksum,
            created_at: chrono::Utc::now().timestamp(),
        };
        let meta = serde_json::to_vec_pretty(&record).map_err(|e| {
            RegistryError::Unavailable(format!("failed to encode version record: {}", e))
        })?;
        let meta_path = dir.join(META_FILE);
        write_atomic(&meta_path, &meta)
            .map_err(|e| unavailable("store version record", &meta_path, e))?;

        info!(
            model = %model_name,
            version = version,
            run_id = %record.run_id,
            checksum = %record.artifact_checksum,
            "Registered model version"
        );

        Ok(record)
    }

    async fn get_alias_version(
        &self,
        model_name: &str,
        alias: Alias,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        let model_dir = self.model_dir(model_name)?;
        let Some(version) = Self::read_alias(&model_dir, alias)? else {
            return Ok(None);
        };

        match Self::read_meta(&model_dir, model_name, version)? {
            Some(record) => Ok(Some(record)),
            None => Err(RegistryError::VersionNotFound {
                model_name: model_name.to_string(),
                version,
            }),
        }
    }

    async fn set_alias(
        &self,
        model_name: &str,
        alias: Alias,
        version: u64,
    ) -> Result<(), RegistryError> {
        let model_dir = self.model_dir(model_name)?;
        if Self::read_meta(&model_dir, model_name, version)?.is_none() {
            return Err(RegistryError::VersionNotFound {
                model_name: model_name.to_string(),
                version,
            });
        }

        let path = Self::alias_path(&model_dir, alias);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| unavailable("create aliases directory", parent, e))?;
        }
        write_atomic(&path, version.to_string().as_bytes())
            .map_err(|e| unavailable("write alias", &path, e))?;

        info!(model = %model_name, alias = %alias, version = version, "Alias updated");
        Ok(())
    }

    async fn load_model(
        &self,
        model_name: &str,
        alias: Alias,
    ) -> Result<LoadedModel, RegistryError> {
        let record = self.get_alias_version(model_name, alias).await?.ok_or_else(|| {
            RegistryError::ModelNotFound {
                model_name: model_name.to_string(),
                alias,
            }
        })?;

        let corrupt = |reason: String| RegistryError::ArtifactCorrupt {
            model_name: model_name.to_string(),
            version: record.version,
            reason,
        };

        let model_dir = self.model_dir(model_name)?;
        let artifact_path = Self::version_dir(&model_dir, record.version).join(ARTIFACT_FILE);
        let weights = fs::read(&artifact_path).map_err(|e| corrupt(e.to_string()))?;

        let checksum = compute_checksum(&weights);
        if checksum != record.artifact_checksum {
            return Err(corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                record.artifact_checksum, checksum
            )));
        }

        let forest = RandomForest::from_json_slice(&weights).map_err(|e| corrupt(e.to_string()))?;

        debug!(model = %model_name, alias = %alias, version = record.version, "Model artifact loaded");
        Ok(LoadedModel::new(record, forest))
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        let model_dir = self.model_dir(model_name)?;
        let versions_dir = model_dir.join("versions");
        let entries = match fs::read_dir(&versions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable("list versions", &versions_dir, e)),
        };

        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable("list versions", &versions_dir, e))?;
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();

        let mut versions = Vec::with_capacity(numbers.len());
        for n in numbers {
            if let Some(record) = Self::read_meta(&model_dir, model_name, n)? {
                versions.push(record);
            }
        }
        Ok(versions)
    }

    async fn aliases(&self, model_name: &str) -> Result<BTreeMap<Alias, u64>, RegistryError> {
        let model_dir = self.model_dir(model_name)?;
        let mut bindings = BTreeMap::new();
        for alias in Alias::ALL {
            if let Some(version) = Self::read_alias(&model_dir, alias)? {
                bindings.insert(alias, version);
            }
        }
        Ok(bindings)
    }
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write to a uniquely named temp file, sync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("registry");
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        nanos
    ));

    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
}

fn unavailable(action: &str, path: &Path, err: io::Error) -> RegistryError {
    RegistryError::Unavailable(format!("failed to {} at {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{constant_forest, write_artifact};
    use tempfile::TempDir;

    const MODEL: &str = "iris-classifier";

    fn metrics(accuracy: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([(ACCURACY_METRIC.to_string(), accuracy)])
    }

    async fn register(registry: &FileRegistry, dir: &Path, run_id: &str, accuracy: f64) -> ModelVersion {
        let artifact = write_artifact(dir, run_id, &constant_forest(0));
        registry
            .register_version(MODEL, &artifact, metrics(accuracy), BTreeMap::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"model weights");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum(b"model weights"));
        assert_ne!(checksum, compute_checksum(b"other weights"));
    }

    #[tokio::test]
    async fn test_register_assigns_increasing_versions() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();

        let v1 = register(&registry, temp.path(), "run-a", 0.9).await;
        let v2 = register(&registry, temp.path(), "run-b", 0.8).await;

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(v1.run_id, "run-a");
        assert_eq!(v2.accuracy(), Some(0.8));

        let listed = registry.list_versions(MODEL).await.unwrap();
        assert_eq!(listed, vec![v1, v2]);
    }

    #[tokio::test]
    async fn test_interrupted_registration_number_is_not_reused() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();

        register(&registry, temp.path(), "run-a", 0.9).await;
        fs::create_dir_all(registry.root().join(MODEL).join("versions").join("2")).unwrap();

        let v3 = register(&registry, temp.path(), "run-c", 0.7).await;
        assert_eq!(v3.version, 3);

        let listed: Vec<u64> = registry
            .list_versions(MODEL)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(listed, vec![1, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_get_distinct_versions() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            let artifact = write_artifact(temp.path(), &format!("run-{}", i), &constant_forest(0));
            handles.push(tokio::spawn(async move {
                registry
                    .register_version(MODEL, &artifact, metrics(0.5), BTreeMap::new())
                    .await
                    .unwrap()
                    .version
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_unset_alias_is_none_not_error() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path()).unwrap();

        assert!(registry
            .get_alias_version(MODEL, Alias::Production)
            .await
            .unwrap()
            .is_none());
        assert!(registry.aliases(MODEL).await.unwrap().is_empty());
        assert!(registry.list_versions(MODEL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_alias_rebinds() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();
        let v1 = register(&registry, temp.path(), "run-a", 0.9).await;
        let v2 = register(&registry, temp.path(), "run-b", 0.95).await;

        registry.set_alias(MODEL, Alias::Production, v1.version).await.unwrap();
        registry.set_alias(MODEL, Alias::Production, v2.version).await.unwrap();

        let bound = registry
            .get_alias_version(MODEL, Alias::Production)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bound.version, 2);
        assert_eq!(
            registry.aliases(MODEL).await.unwrap(),
            BTreeMap::from([(Alias::Production, 2)])
        );
    }

    #[tokio::test]
    async fn test_set_alias_unknown_version() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path()).unwrap();

        let err = registry.set_alias(MODEL, Alias::Challenger, 7).await.unwrap_err();
        assert!(matches!(err, RegistryError::VersionNotFound { version: 7, .. }));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_artifact() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();

        let bogus = temp.path().join("bogus.json");
        fs::write(&bogus, b"{\"not\": \"a forest\"}").unwrap();
        let err = registry
            .register_version(MODEL, &bogus, metrics(0.9), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArtifact { .. }));

        let missing = temp.path().join("missing.json");
        let err = registry
            .register_version(MODEL, &missing, metrics(0.9), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArtifact { .. }));

        assert!(registry.list_versions(MODEL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_requires_accuracy() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();
        let artifact = write_artifact(temp.path(), "run-a", &constant_forest(0));

        let err = registry
            .register_version(MODEL, &artifact, BTreeMap::new(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingAccuracy(_)));
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path().join("not-mounted"));

        let err = registry
            .get_alias_version(MODEL, Alias::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));

        let err = registry.load_model(MODEL, Alias::Production).await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_model_name_rejected() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path()).unwrap();
        assert!(registry.aliases("../escape").await.is_err());
        assert!(registry.aliases("").await.is_err());
    }

    #[tokio::test]
    async fn test_load_model_by_alias() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();

        let err = registry.load_model(MODEL, Alias::Production).await.unwrap_err();
        assert!(err.is_not_found());

        let artifact = write_artifact(temp.path(), "run-a", &constant_forest(2));
        let v1 = registry
            .register_version(MODEL, &artifact, metrics(0.9), BTreeMap::new())
            .await
            .unwrap();
        registry.set_alias(MODEL, Alias::Production, v1.version).await.unwrap();

        let loaded = registry.load_model(MODEL, Alias::Production).await.unwrap();
        assert_eq!(loaded.version(), &v1);
        assert_eq!(loaded.predictor().predict(&[0.0, 0.0]).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_model_detects_corruption() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::create(temp.path().join("registry")).unwrap();
        let v1 = register(&registry, temp.path(), "run-a", 0.9).await;
        registry.set_alias(MODEL, Alias::Production, v1.version).await.unwrap();

        let stored = registry
            .root()
            .join(MODEL)
            .join("versions")
            .join("1")
            .join(ARTIFACT_FILE);
        fs::write(&stored, b"garbage").unwrap();

        let err = registry.load_model(MODEL, Alias::Production).await.unwrap_err();
        assert!(matches!(err, RegistryError::ArtifactCorrupt { version: 1, .. }));
    }
}
