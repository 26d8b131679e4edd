//! HTTP API: prediction, retraining, model info, health and metrics

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mlops_lib::health::ComponentStatus;
use mlops_lib::serving::{ModelService, ServeError};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ModelService>,
}

impl AppState {
    pub fn new(service: Arc<ModelService>) -> Self {
        Self { service }
    }
}

/// Error body `{"error": ...}` with a status derived from the failure
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        let status = match &err {
            ServeError::ModelUnavailable(_) | ServeError::Registry(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServeError::MissingFeature(_) | ServeError::InvalidFeature(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServeError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// 200 while operational, 503 only if a component is unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.service.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 once a model is loaded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.service.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<HashMap<String, Value>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(raw) = body.map_err(|e| ApiError::new(e.status(), e.body_text()))?;

    // non-numbers become NaN so only the features the model reads are rejected
    let features: HashMap<String, f64> = raw
        .into_iter()
        .map(|(name, value)| (name, value.as_f64().unwrap_or(f64::NAN)))
        .collect();

    match state.service.predict(&features).await {
        Ok(prediction) => Ok(Json(prediction)),
        Err(e) => {
            warn!(error = %e, "Prediction failed");
            Err(e.into())
        }
    }
}

async fn retrain(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ack = state.service.trigger_retrain();
    (StatusCode::ACCEPTED, Json(ack))
}

async fn model_info(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let info = state.service.model_info().await?;
    Ok(Json(info))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/predict", post(predict))
        .route("/retrain", post(retrain))
        .route("/model/info", get(model_info))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
