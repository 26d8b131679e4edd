//! Promotion decision
//!
//! Decides which alias a freshly registered candidate receives. The first
//! model always becomes production; afterwards only a strict accuracy
//! improvement moves production, and a tie keeps the current model.

use crate::models::Alias;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PromotionError {
    #[error("invalid {name} accuracy: {value} is not a finite number")]
    InvalidMetric { name: &'static str, value: f64 },
}

/// Pick the alias for a candidate given the current production accuracy.
pub fn decide_promotion(
    candidate_accuracy: f64,
    production_accuracy: Option<f64>,
) -> Result<Alias, PromotionError> {
    if !candidate_accuracy.is_finite() {
        return Err(PromotionError::InvalidMetric {
            name: "candidate",
            value: candidate_accuracy,
        });
    }

    match production_accuracy {
        None => Ok(Alias::Production),
        Some(current) if !current.is_finite() => Err(PromotionError::InvalidMetric {
            name: "production",
            value: current,
        }),
        Some(current) if candidate_accuracy > current => Ok(Alias::Production),
        Some(_) => Ok(Alias::Challenger),
    }
}
