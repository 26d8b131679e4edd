//! Serving-side coordination: model loading, prediction and retraining
//!
//! `ModelService` owns the model holder and is the only place that swaps
//! it. Loads always resolve the `production` alias in the registry, so the
//! service never decides what production is; it only follows it.

use super::ModelHolder;
use crate::health::{components, ComponentHealth, ComponentStatus, HealthRegistry, ReadinessResponse};
use crate::launcher::{JobLauncher, JobOutcome, DEFAULT_JOB_TIMEOUT};
use crate::models::{Alias, ModelInfo, ModelSummary, Prediction, RetrainAck};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::predictor::{FeatureError, LoadedModel};
use crate::registry::{ModelRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("model not available: {0}")]
    ModelUnavailable(String),

    #[error("missing feature '{0}'")]
    MissingFeature(String),

    #[error("feature '{0}' must be a finite number")]
    InvalidFeature(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<FeatureError> for ServeError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::Missing(name) => ServeError::MissingFeature(name),
            FeatureError::NotFinite(name) => ServeError::InvalidFeature(name),
            FeatureError::Model(e) => ServeError::Prediction(e.to_string()),
        }
    }
}

/// Service settings
#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub model_name: String,
    /// How long a retrain waits for its job before reloading
    pub reload_timeout: Duration,
    /// After this a job counts as failed and the retrain slot is released
    pub job_timeout: Duration,
    pub service_name: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_name: crate::training::DEFAULT_MODEL_NAME.to_string(),
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            service_name: "inference-service".to_string(),
        }
    }
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ComponentStatus,
    pub model_loaded: bool,
    pub model: Option<ModelSummary>,
    pub retrain_in_flight: bool,
    pub components: HashMap<String, ComponentHealth>,
}

pub struct ModelService {
    config: ServingConfig,
    registry: Arc<dyn ModelRegistry>,
    launcher: Arc<dyn JobLauncher>,
    holder: ModelHolder,
    health: HealthRegistry,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
    reload_lock: Mutex<()>,
    retrain_in_flight: AtomicBool,
    reload_pending: AtomicBool,
}

impl ModelService {
    pub fn new(
        config: ServingConfig,
        registry: Arc<dyn ModelRegistry>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Arc<Self> {
        let logger = StructuredLogger::new(&config.service_name);
        Arc::new(Self {
            config,
            registry,
            launcher,
            holder: ModelHolder::new(),
            health: HealthRegistry::new(),
            metrics: ServiceMetrics::new(),
            logger,
            reload_lock: Mutex::new(()),
            retrain_in_flight: AtomicBool::new(false),
            reload_pending: AtomicBool::new(false),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    pub fn holder(&self) -> &ModelHolder {
        &self.holder
    }

    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn retrain_in_flight(&self) -> bool {
        self.retrain_in_flight.load(Ordering::SeqCst)
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_pending.load(Ordering::SeqCst)
    }

    /// Load the production model once at startup. Failure leaves the
    /// service running without a model.
    pub async fn initialize(&self) {
        self.health.register(components::REGISTRY).await;
        self.health.register(components::TRAINER).await;
        self.health
            .set_degraded(components::MODEL, "model not loaded yet")
            .await;

        match self.reload().await {
            Ok(version) => info!(version = version, "Serving production model"),
            Err(e) => warn!(error = %e, "Starting without a model"),
        }
    }

    /// Load the current production version and swap it in. On failure the
    /// previously loaded model, if any, keeps serving.
    pub async fn reload(&self) -> Result<u64, ServeError> {
        let _guard = self.reload_lock.lock().await;
        let previous = self.holder.loaded_version().await;

        match self
            .registry
            .load_model(&self.config.model_name, Alias::Production)
            .await
        {
            Ok(model) => {
                let version = model.version().version;
                if previous != Some(version) {
                    self.holder.replace(Arc::new(model)).await;
                    self.logger
                        .log_model_loaded(&self.config.model_name, version, previous);
                } else {
                    debug!(version = version, "Production version unchanged");
                }

                self.reload_pending.store(false, Ordering::SeqCst);
                self.metrics.inc_reloads("success");
                self.metrics.set_model_version(version);
                self.health.set_healthy(components::REGISTRY).await;
                self.health.set_healthy(components::MODEL).await;
                self.health.set_ready(true).await;
                Ok(version)
            }
            Err(e) => {
                self.metrics.inc_reloads("failure");
                self.logger
                    .log_model_load_failed(&self.config.model_name, previous, &e.to_string());
                self.record_load_failure(&e, previous).await;
                Err(ServeError::Registry(e))
            }
        }
    }

    async fn record_load_failure(&self, err: &RegistryError, previous: Option<u64>) {
        match err {
            RegistryError::Unavailable(_) => {
                self.health
                    .set_unhealthy(components::REGISTRY, err.to_string())
                    .await
            }
            _ => self.health.set_healthy(components::REGISTRY).await,
        }

        let message = match previous {
            Some(version) => format!("reload failed, still serving version {}: {}", version, err),
            None if err.is_not_found() => "no production model registered yet".to_string(),
            None => format!("no model loaded: {}", err),
        };
        self.health.set_degraded(components::MODEL, message).await;
    }

    /// Reload if nothing is loaded or a deferred reload is waiting
    async fn ensure_model(&self) -> Option<Arc<LoadedModel>> {
        let current = self.holder.current().await;
        if current.is_none() || self.reload_pending() {
            if let Err(e) = self.reload().await {
                debug!(error = %e, "Lazy reload failed");
            }
            return self.holder.current().await;
        }
        current
    }

    /// Classify one request against a single model snapshot
    pub async fn predict(&self, features: &HashMap<String, f64>) -> Result<Prediction, ServeError> {
        self.metrics.inc_prediction_requests();

        let Some(model) = self.ensure_model().await else {
            self.metrics.inc_prediction_errors();
            return Err(ServeError::ModelUnavailable(
                "no production model loaded".to_string(),
            ));
        };

        let started = Instant::now();
        let result = model.predict_named(features);
        self.metrics
            .observe_prediction_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(prediction) => Ok(Prediction {
                prediction,
                model_version: model.version().version,
            }),
            Err(e) => {
                self.metrics.inc_prediction_errors();
                Err(e.into())
            }
        }
    }

    /// Acknowledge a retrain request and run it in the background. A
    /// request arriving while one is running joins it.
    pub fn trigger_retrain(self: &Arc<Self>) -> RetrainAck {
        self.metrics.inc_retrain_requests();

        let trigger_id = format!(
            "retrain-{:x}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let coalesced = self.retrain_in_flight.swap(true, Ordering::SeqCst);
        self.logger.log_retrain_triggered(&trigger_id, coalesced);

        if !coalesced {
            let service = Arc::clone(self);
            let id = trigger_id.clone();
            tokio::spawn(async move {
                service.run_retrain(&id).await;
                service.retrain_in_flight.store(false, Ordering::SeqCst);
            });
        }

        let message = if coalesced {
            "Retraining already in progress; this request joins it."
        } else {
            "Retraining job has been triggered. Model will be updated in the background."
        };

        RetrainAck {
            status: "retraining_started".to_string(),
            message: message.to_string(),
            trigger_id,
            coalesced,
        }
    }

    async fn run_retrain(&self, trigger_id: &str) {
        let handle = match self.launcher.launch_training_job().await {
            Ok(handle) => handle,
            Err(e) => {
                error!(trigger_id = %trigger_id, error = %e, "Failed to launch training job");
                self.health
                    .set_degraded(components::TRAINER, format!("launch failed: {}", e))
                    .await;
                return;
            }
        };

        let job_id = handle.id().to_string();
        let timeout = self.config.reload_timeout;
        let wait = handle.wait();
        tokio::pin!(wait);

        let outcome = match tokio::time::timeout(timeout, &mut wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    trigger_id = %trigger_id,
                    job_id = %job_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Training job still running, reload deferred"
                );
                self.reload_pending.store(true, Ordering::SeqCst);

                let remaining = self.config.job_timeout.saturating_sub(timeout);
                match tokio::time::timeout(remaining, &mut wait).await {
                    Ok(outcome) => outcome,
                    Err(_) => JobOutcome::Failed {
                        code: None,
                        detail: format!(
                            "timed out after {}s",
                            self.config.job_timeout.as_secs_f64()
                        ),
                    },
                }
            }
        };

        self.logger
            .log_retrain_completed(trigger_id, &job_id, outcome.as_str());

        match outcome {
            JobOutcome::Succeeded => {
                self.health.set_healthy(components::TRAINER).await;
                if self.reload().await.is_err() {
                    self.reload_pending.store(true, Ordering::SeqCst);
                }
            }
            JobOutcome::Detached => {
                tokio::time::sleep(timeout).await;
                let _ = self.reload().await;
                // completion is unobservable, so check again on the next request
                self.reload_pending.store(true, Ordering::SeqCst);
            }
            JobOutcome::Failed { .. } => {
                self.health
                    .set_degraded(components::TRAINER, format!("last training job {}", outcome))
                    .await;
            }
        }
    }

    /// Registry view of the model, re-queried on every call
    pub async fn model_info(&self) -> Result<ModelInfo, ServeError> {
        let name = self.config.model_name.as_str();
        let production = self.registry.get_alias_version(name, Alias::Production).await?;
        let total_versions = self.registry.list_versions(name).await?.len();
        let aliases = self.registry.aliases(name).await?;

        Ok(ModelInfo {
            model_name: name.to_string(),
            loaded_version: self.holder.loaded_version().await,
            production,
            total_versions,
            aliases,
        })
    }

    pub async fn health(&self) -> ServiceHealth {
        let model = self.ensure_model().await;
        let report = self.health.health().await;

        ServiceHealth {
            status: report.status,
            model_loaded: model.is_some(),
            model: model.map(|m| m.summary()),
            retrain_in_flight: self.retrain_in_flight(),
            components: report.components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        self.health.readiness().await
    }
}
