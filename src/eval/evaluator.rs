//! Threshold evaluators
//!
//! An evaluator classifies a reduced scalar as matching or not. Numeric
//! operators never match a missing value; only `NoValue` does.

use serde::{Deserialize, Serialize};

/// Threshold operator applied to a reduced series value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdEvaluator {
    Gt { threshold: f64 },
    Lt { threshold: f64 },
    Eq { threshold: f64 },
    /// Matches when the value lies strictly inside `(min, max)`.
    WithinRange { min: f64, max: f64 },
    /// Matches when the value lies strictly outside `[min, max]`.
    OutsideRange { min: f64, max: f64 },
    /// Matches only a missing value (all-null or empty series).
    NoValue,
}

impl ThresholdEvaluator {
    pub fn eval(&self, reduced: Option<f64>) -> bool {
        match (self, reduced) {
            (ThresholdEvaluator::NoValue, None) => true,
            (_, None) => false,
            (ThresholdEvaluator::Gt { threshold }, Some(v)) => v > *threshold,
            (ThresholdEvaluator::Lt { threshold }, Some(v)) => v < *threshold,
            (ThresholdEvaluator::Eq { threshold }, Some(v)) => v == *threshold,
            (ThresholdEvaluator::WithinRange { min, max }, Some(v)) => v > *min && v < *max,
            (ThresholdEvaluator::OutsideRange { min, max }, Some(v)) => v < *min || v > *max,
            (ThresholdEvaluator::NoValue, Some(_)) => false,
        }
    }
}
