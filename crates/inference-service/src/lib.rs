//! Inference service: HTTP surface over the model serving core

pub mod api;
pub mod config;
