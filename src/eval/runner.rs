//! Rule evaluation
//!
//! Fetches a rule's series through the datasource collaborator, applies the
//! condition, and classifies every series for the state manager. A query
//! failure is surfaced as a distinct `Error` classification so the rule's
//! execution-error policy can be applied downstream; it never aborts the
//! caller's evaluation loop.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::bus::{BusError, DataSource, DispatchBus};
use crate::model::{AlertRule, LabelSet, State, TimeSeries};

use super::condition::Condition;

/// Ref id the single-condition pipeline captures values under.
pub const QUERY_REF_ID: &str = "A";

/// Evaluation errors
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("query execution failed: {0}")]
    QueryFailed(String),

    #[error("data source lookup failed: {0}")]
    DataSource(#[from] BusError),
}

/// Supplies labeled numeric series for a rule. Implemented by datasource
/// connectors, which are outside this crate.
pub trait SeriesSource: Send + Sync {
    fn query<'a>(
        &'a self,
        rule: &'a AlertRule,
        data_source: &'a DataSource,
    ) -> BoxFuture<'a, Result<Vec<TimeSeries>, EvalError>>;
}

/// One classified series outcome, consumed once by the state manager.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The series' own labels.
    pub instance: LabelSet,
    /// Normal / Alerting / NoData / Error. Pending is a state-manager-only
    /// concept and never produced here.
    pub state: State,
    pub evaluated_at: DateTime<Utc>,
    pub duration: Duration,
    /// Captured numeric values per query ref, for template expansion.
    pub values: HashMap<String, Option<f64>>,
    /// Human-readable evaluation summary, exposed to templates as `$value`.
    pub eval_string: String,
    /// Set when `state` is `Error`.
    pub error: Option<String>,
}

impl EvalResult {
    fn new(instance: LabelSet, state: State, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            instance,
            state,
            evaluated_at,
            duration: Duration::ZERO,
            values: HashMap::new(),
            eval_string: String::new(),
            error: None,
        }
    }
}

/// Evaluates one rule's condition per tick.
pub struct RuleEvaluator {
    condition: Condition,
}

impl RuleEvaluator {
    pub fn new(condition: Condition) -> Self {
        Self { condition }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Run one evaluation tick. Always returns at least one result; errors
    /// become a single `Error`-classified result.
    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        bus: &dyn DispatchBus,
        source: &dyn SeriesSource,
        now: DateTime<Utc>,
    ) -> Vec<EvalResult> {
        let started = std::time::Instant::now();

        let series_set = match self.fetch_series(rule, bus, source).await {
            Ok(series_set) => series_set,
            Err(e) => {
                tracing::warn!(
                    rule_uid = %rule.uid,
                    org_id = rule.org_id,
                    error = %e,
                    "rule evaluation failed"
                );
                let mut result = EvalResult::new(LabelSet::new(), State::Error, now);
                result.duration = started.elapsed();
                result.error = Some(e.to_string());
                return vec![result];
            }
        };

        let duration = started.elapsed();
        self.classify(&series_set, now, duration)
    }

    async fn fetch_series(
        &self,
        rule: &AlertRule,
        bus: &dyn DispatchBus,
        source: &dyn SeriesSource,
    ) -> Result<Vec<TimeSeries>, EvalError> {
        let data_source = bus.get_data_source(rule.org_id, rule.datasource_id)?;
        source.query(rule, &data_source).await
    }

    /// Classify each series independently. An empty result set synthesizes
    /// one evaluation against a null value.
    fn classify(
        &self,
        series_set: &[TimeSeries],
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Vec<EvalResult> {
        if series_set.is_empty() {
            let matched = self.condition.evaluator.eval(None);
            let state = if matched { State::Alerting } else { State::NoData };
            let mut result = EvalResult::new(LabelSet::new(), state, now);
            result.duration = duration;
            result.values.insert(QUERY_REF_ID.to_string(), None);
            result.eval_string = eval_string(QUERY_REF_ID, &LabelSet::new(), None);
            return vec![result];
        }

        series_set
            .iter()
            .map(|series| {
                let (reduced, matched) = self.condition.eval_series(series);
                let state = if matched {
                    State::Alerting
                } else if reduced.is_none() {
                    State::NoData
                } else {
                    State::Normal
                };

                let mut result = EvalResult::new(series.tags.clone(), state, now);
                result.duration = duration;
                result.values.insert(QUERY_REF_ID.to_string(), reduced);
                result.eval_string = eval_string(QUERY_REF_ID, &series.tags, reduced);
                result
            })
            .collect()
    }
}

/// Render the `$value` summary, e.g. `[ var='A' labels={host=web-1} value=10 ]`.
fn eval_string(ref_id: &str, labels: &LabelSet, value: Option<f64>) -> String {
    let labels = labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    let value = match value {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    };
    format!("[ var='{}' labels={{{}}} value={} ]", ref_id, labels, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::eval::evaluator::ThresholdEvaluator;
    use crate::eval::reducer::Reducer;
    use crate::model::Point;

    struct StaticSource(Vec<TimeSeries>);

    impl SeriesSource for StaticSource {
        fn query<'a>(
            &'a self,
            _rule: &'a AlertRule,
            _data_source: &'a DataSource,
        ) -> BoxFuture<'a, Result<Vec<TimeSeries>, EvalError>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    struct FailingSource;

    impl SeriesSource for FailingSource {
        fn query<'a>(
            &'a self,
            _rule: &'a AlertRule,
            _data_source: &'a DataSource,
        ) -> BoxFuture<'a, Result<Vec<TimeSeries>, EvalError>> {
            Box::pin(async move { Err(EvalError::QueryFailed("backend down".to_string())) })
        }
    }

    fn bus_with_datasource() -> InMemoryBus {
        let bus = InMemoryBus::new();
        bus.add_data_source(DataSource {
            id: 1,
            org_id: 1,
            name: "prom".to_string(),
            url: "http://localhost:9090".to_string(),
        });
        bus
    }

    fn rule() -> AlertRule {
        let mut rule = AlertRule::new(1, "rule-1", "cpu high");
        rule.datasource_id = 1;
        rule
    }

    #[tokio::test]
    async fn test_series_classified_independently() {
        let evaluator = RuleEvaluator::new(Condition::new(
            Reducer::Avg,
            ThresholdEvaluator::Gt { threshold: 100.0 },
        ));
        let bus = bus_with_datasource();

        let hot: LabelSet = [("host", "a")].into_iter().collect();
        let cold: LabelSet = [("host", "b")].into_iter().collect();
        let source = StaticSource(vec![
            TimeSeries::new("cpu")
                .with_tags(hot.clone())
                .with_points(vec![Point::new(200.0, 0)]),
            TimeSeries::new("cpu")
                .with_tags(cold.clone())
                .with_points(vec![Point::new(10.0, 0)]),
        ]);

        let results = evaluator.evaluate(&rule(), &bus, &source, Utc::now()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].state, State::Alerting);
        assert_eq!(results[0].instance, hot);
        assert_eq!(results[1].state, State::Normal);
        assert_eq!(results[1].values[QUERY_REF_ID], Some(10.0));
    }

    #[tokio::test]
    async fn test_query_failure_is_error_classification() {
        let evaluator = RuleEvaluator::new(Condition::new(
            Reducer::Avg,
            ThresholdEvaluator::Gt { threshold: 100.0 },
        ));
        let bus = bus_with_datasource();

        let results = evaluator
            .evaluate(&rule(), &bus, &FailingSource, Utc::now())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, State::Error);
        assert!(results[0].error.as_deref().unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn test_empty_set_synthesizes_no_data() {
        let evaluator = RuleEvaluator::new(Condition::new(
            Reducer::Avg,
            ThresholdEvaluator::Gt { threshold: 100.0 },
        ));
        let bus = bus_with_datasource();
        let results = evaluator
            .evaluate(&rule(), &bus, &StaticSource(vec![]), Utc::now())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, State::NoData);
    }

    #[tokio::test]
    async fn test_empty_set_with_no_value_evaluator_alerts() {
        let evaluator =
            RuleEvaluator::new(Condition::new(Reducer::Avg, ThresholdEvaluator::NoValue));
        let bus = bus_with_datasource();
        let results = evaluator
            .evaluate(&rule(), &bus, &StaticSource(vec![]), Utc::now())
            .await;
        assert_eq!(results[0].state, State::Alerting);
    }

    #[test]
    fn test_eval_string_format() {
        let labels: LabelSet = [("host", "web-1")].into_iter().collect();
        assert_eq!(
            eval_string("A", &labels, Some(10.0)),
            "[ var='A' labels={host=web-1} value=10 ]"
        );
    }
}
