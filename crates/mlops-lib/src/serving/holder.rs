//! Atomically replaceable reference to the model being served

use crate::predictor::LoadedModel;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds the current model. Readers take an `Arc` snapshot and release the
/// lock before predicting, so a swap never waits on inference and an
/// in-flight prediction keeps the model it started with.
#[derive(Debug, Default)]
pub struct ModelHolder {
    current: RwLock<Option<Arc<LoadedModel>>>,
}

impl ModelHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<LoadedModel>> {
        self.current.read().await.clone()
    }

    /// Swap in `model` and return the one it replaced
    pub async fn replace(&self, model: Arc<LoadedModel>) -> Option<Arc<LoadedModel>> {
        self.current.write().await.replace(model)
    }

    pub async fn loaded_version(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(|m| m.version().version)
    }
}
