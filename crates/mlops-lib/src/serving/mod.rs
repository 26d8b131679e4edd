//! Model serving: the swappable model reference and the service around it

mod holder;
mod service;


pub use holder::ModelHolder;
pub use service::{
    ModelService, ServeError, ServiceHealth, ServingConfig, DEFAULT_RELOAD_TIMEOUT,
};
