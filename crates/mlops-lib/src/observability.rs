//! Prometheus metrics and structured log events
//!
//! Metrics are registered once in the default Prometheus registry; every
//! `ServiceMetrics` handle shares them.

use crate::models::Alias;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    prediction_requests: IntCounter,
    retrain_requests: IntCounter,
    prediction_errors: IntCounter,
    reloads: IntCounterVec,
    prediction_latency_seconds: Histogram,
    model_version_info: GaugeVec,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            prediction_requests: register_int_counter!(
                "prediction_requests_total",
                "Total prediction requests"
            )
            .expect("Failed to register prediction_requests_total"),

            retrain_requests: register_int_counter!(
                "model_retrain_total",
                "Total retraining triggers"
            )
            .expect("Failed to register model_retrain_total"),

            prediction_errors: register_int_counter!(
                "model_prediction_errors_total",
                "Prediction requests that failed"
            )
            .expect("Failed to register model_prediction_errors_total"),

            reloads: register_int_counter_vec!(
                "model_reloads_total",
                "Model reload attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register model_reloads_total"),

            prediction_latency_seconds: register_histogram!(
                "model_prediction_latency_seconds",
                "Time spent classifying one request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register model_prediction_latency_seconds"),

            model_version_info: register_gauge_vec!(
                "model_version_info",
                "Registry version of the model currently served",
                &["version"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Cheap handle to the process-wide metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn inc_prediction_requests(&self) {
        self.inner().prediction_requests.inc();
    }

    pub fn inc_retrain_requests(&self) {
        self.inner().retrain_requests.inc();
    }

    pub fn inc_prediction_errors(&self) {
        self.inner().prediction_errors.inc();
    }

    /// `outcome` is `success` or `failure`
    pub fn inc_reloads(&self, outcome: &str) {
        self.inner().reloads.with_label_values(&[outcome]).inc();
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    /// Expose only the version now being served
    pub fn set_model_version(&self, version: u64) {
        let label = version.to_string();
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[label.as_str()])
            .set(1.0);
    }

    pub fn prediction_requests(&self) -> u64 {
        self.inner().prediction_requests.get()
    }

    pub fn retrain_requests(&self) -> u64 {
        self.inner().retrain_requests.get()
    }
}

/// Named events for log aggregation
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, model_name: &str, port: u16) {
        info!(
            event = "service_started",
            service = %self.service,
            service_version = %version,
            model = %model_name,
            port = port,
            "Inference service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Inference service shutting down"
        );
    }

    pub fn log_model_loaded(&self, model_name: &str, version: u64, previous: Option<u64>) {
        info!(
            event = "model_loaded",
            service = %self.service,
            model = %model_name,
            version = version,
            previous_version = ?previous,
            "Production model loaded"
        );
    }

    pub fn log_model_load_failed(&self, model_name: &str, kept: Option<u64>, error: &str) {
        warn!(
            event = "model_load_failed",
            service = %self.service,
            model = %model_name,
            kept_version = ?kept,
            error = %error,
            "Model load failed, keeping previous state"
        );
    }

    pub fn log_retrain_triggered(&self, trigger_id: &str, coalesced: bool) {
        info!(
            event = "retrain_triggered",
            service = %self.service,
            trigger_id = %trigger_id,
            coalesced = coalesced,
            "Retraining triggered"
        );
    }

    pub fn log_retrain_completed(&self, trigger_id: &str, job_id: &str, outcome: &str) {
        info!(
            event = "retrain_completed",
            service = %self.service,
            trigger_id = %trigger_id,
            job_id = %job_id,
            outcome = %outcome,
            "Retraining job finished"
        );
    }

    pub fn log_training_summary(
        &self,
        model_name: &str,
        version: u64,
        accuracy: f64,
        production_accuracy: Option<f64>,
        alias: Alias,
    ) {
        info!(
            event = "training_summary",
            service = %self.service,
            model = %model_name,
            version = version,
            accuracy = accuracy,
            production_accuracy = ?production_accuracy,
            alias = %alias,
            "Training run published"
        );
    }
}
