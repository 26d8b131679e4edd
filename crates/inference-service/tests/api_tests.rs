//! Integration tests for the inference service API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use inference_service::api::{create_router, AppState};
use mlops_lib::launcher::{JobHandle, JobLauncher, JobOutcome, LaunchError};
use mlops_lib::predictor::ForestParams;
use mlops_lib::registry::FileRegistry;
use mlops_lib::serving::{ModelService, ServingConfig};
use mlops_lib::training::{TrainingConfig, TrainingJob};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const MODEL: &str = "iris-classifier";

/// Launcher whose jobs succeed immediately without doing anything
struct InstantLauncher;

#[async_trait]
impl JobLauncher for InstantLauncher {
    async fn launch_training_job(&self) -> Result<JobHandle, LaunchError> {
        Ok(JobHandle::resolved("instant", JobOutcome::Succeeded))
    }
}

struct TestApp {
    temp: TempDir,
    registry: Arc<FileRegistry>,
    service: Arc<ModelService>,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(FileRegistry::create(temp.path().join("registry")).unwrap());
        let config = ServingConfig {
            model_name: MODEL.to_string(),
            reload_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let service = ModelService::new(config, registry.clone(), Arc::new(InstantLauncher));
        service.initialize().await;
        let router = create_router(Arc::new(AppState::new(service.clone())));
        Self {
            temp,
            registry,
            service,
            router,
        }
    }

    async fn train(&self) {
        let config = TrainingConfig {
            model_name: MODEL.to_string(),
            staging_dir: self.temp.path().join("staging"),
            forest: ForestParams {
                n_estimators: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        TrainingJob::new(config, self.registry.clone())
            .run()
            .await
            .unwrap();
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, body) = self
            .send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn setosa() -> Value {
    json!({
        "sepal_length": 5.1,
        "sepal_width": 3.5,
        "petal_length": 1.4,
        "petal_width": 0.2
    })
}

#[tokio::test]
async fn test_health_without_model_is_degraded_but_ok() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["model_loaded"], false);
    assert!(body["model"].is_null());
}

#[tokio::test]
async fn test_readyz_follows_model_state() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);

    app.train().await;
    app.service.reload().await.unwrap();

    let (status, _) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_predict_without_model_returns_503() {
    let app = TestApp::new().await;

    let (status, body) = app.post("/predict", setosa()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not available"));
}

#[tokio::test]
async fn test_predict_with_trained_model() {
    let app = TestApp::new().await;
    app.train().await;

    let (status, body) = app.post("/predict", setosa()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);
    assert_eq!(body["model_version"], 1);

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["model"]["version"], 1);
}

#[tokio::test]
async fn test_predict_rejects_bad_features() {
    let app = TestApp::new().await;
    app.train().await;

    let (status, body) = app
        .post("/predict", json!({ "sepal_length": 5.1, "sepal_width": 3.5 }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("missing feature"));

    let mut wrong_type = setosa();
    wrong_type["petal_width"] = json!("wide");
    let (status, body) = app.post("/predict", wrong_type).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("petal_width"));
}

#[tokio::test]
async fn test_predict_ignores_unused_keys() {
    let app = TestApp::new().await;
    app.train().await;

    let mut request = setosa();
    request["colour"] = json!("red");
    request["tags"] = json!(["a", "b"]);
    let (status, body) = app.post("/predict", request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);
}

#[tokio::test]
async fn test_predict_rejects_malformed_json() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_retrain_is_acknowledged_and_reloads() {
    let app = TestApp::new().await;
    app.train().await;

    let (status, body) = app.post("/retrain", json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "retraining_started");
    assert!(body["message"].is_string());
    assert!(body["trigger_id"].as_str().unwrap().starts_with("retrain-"));

    for _ in 0..200 {
        if !app.service.retrain_in_flight() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.service.holder().loaded_version().await, Some(1));
}

#[tokio::test]
async fn test_model_info() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/model/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_name"], MODEL);
    assert!(body["production"].is_null());
    assert_eq!(body["total_versions"], 0);

    app.train().await;
    app.train().await;

    let (_, body) = app.get("/model/info").await;
    assert_eq!(body["total_versions"], 2);
    assert_eq!(body["production"]["version"], 1);
    assert_eq!(body["aliases"]["production"], 1);
    assert_eq!(body["aliases"]["challenger"], 2);
    assert!(body["production"]["metrics"]["accuracy"].as_f64().unwrap() > 0.8);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new().await;
    app.post("/predict", setosa()).await;
    app.post("/retrain", json!({})).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("prediction_requests_total"));
    assert!(text.contains("model_retrain_total"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = TestApp::new().await;
    let request = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
