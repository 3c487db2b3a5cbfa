//! Alert conditions
//!
//! A condition pairs a reducer with a threshold evaluator and classifies a
//! whole query result set as firing or not.

use serde::{Deserialize, Serialize};

use crate::model::{LabelSet, TimeSeries};

use super::evaluator::ThresholdEvaluator;
use super::reducer::Reducer;

/// Metric name reported for the synthesized no-series evaluation.
pub const NO_DATA_METRIC: &str = "NoData";

/// Reduce-then-compare condition over a query result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub reducer: Reducer,
    pub evaluator: ThresholdEvaluator,
}

/// One series that matched the condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    pub value: Option<f64>,
    pub tags: LabelSet,
}

/// Outcome of evaluating a condition against a series set.
#[derive(Debug, Clone, Default)]
pub struct ConditionResult {
    /// True when at least one series (or the synthesized null evaluation)
    /// matched.
    pub firing: bool,
    /// True iff every series reduced to no value. Not the negation of
    /// `firing`: both can hold at once for a `no_value` evaluator.
    pub no_data_found: bool,
    pub matches: Vec<EvalMatch>,
}

impl Condition {
    pub fn new(reducer: Reducer, evaluator: ThresholdEvaluator) -> Self {
        Self { reducer, evaluator }
    }

    /// Reduce one series and apply the evaluator.
    pub fn eval_series(&self, series: &TimeSeries) -> (Option<f64>, bool) {
        let reduced = self.reducer.reduce(series);
        (reduced, self.evaluator.eval(reduced))
    }

    /// Evaluate the condition over a full result set.
    ///
    /// An empty set synthesizes one evaluation against a null value so a
    /// `no_value` evaluator can still fire; otherwise "no data" would never
    /// be observable by such a rule.
    pub fn eval(&self, series_set: &[TimeSeries]) -> ConditionResult {
        let mut empty_series = 0;
        let mut matches = Vec::new();

        for series in series_set {
            let (reduced, matched) = self.eval_series(series);
            if reduced.is_none() {
                empty_series += 1;
            }
            if matched {
                matches.push(EvalMatch {
                    metric: series.name.clone(),
                    value: reduced,
                    tags: series.tags.clone(),
                });
            }
        }

        if series_set.is_empty() && self.evaluator.eval(None) {
            matches.push(EvalMatch {
                metric: NO_DATA_METRIC.to_string(),
                value: None,
                tags: LabelSet::new(),
            });
        }

        ConditionResult {
            firing: !matches.is_empty(),
            no_data_found: empty_series == series_set.len(),
            matches,
        }
    }
}
