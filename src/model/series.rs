//! Time series input to the evaluator

use serde::{Deserialize, Serialize};

use super::labels::LabelSet;

/// A single data point: nullable value plus epoch-millisecond timestamp.
/// Null models a gap in the series; NaN is treated the same way by the
/// reducers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub value: Option<f64>,
    pub timestamp_ms: i64,
}

impl Point {
    pub fn new(value: impl Into<Option<f64>>, timestamp_ms: i64) -> Self {
        Self {
            value: value.into(),
            timestamp_ms,
        }
    }

    /// A point counts for reduction only if it holds a real number.
    pub fn is_valid(&self) -> bool {
        matches!(self.value, Some(v) if !v.is_nan())
    }
}

/// A labeled numeric series returned by a datasource query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub tags: LabelSet,
    pub points: Vec<Point>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: LabelSet::new(),
            points: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: LabelSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }
}
