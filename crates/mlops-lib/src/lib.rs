//! Model promotion, retraining and serving library
//!
//! This crate provides the core functionality for:
//! - Registering model versions and maintaining production/challenger aliases
//! - Training a classifier and deciding whether it is promoted
//! - Launching training jobs outside the serving process
//! - Serving the production model with atomic reloads
//! - Health checks and observability

pub mod dataset;
pub mod health;
pub mod launcher;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod promotion;
pub mod registry;
pub mod serving;
pub mod training;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use promotion::decide_promotion;
pub use registry::{FileRegistry, ModelRegistry, RegistryError};
