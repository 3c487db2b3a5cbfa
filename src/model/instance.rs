//! Per-instance alert state

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::labels::LabelSet;

/// Evaluation history kept per instance.
pub const MAX_EVALUATION_HISTORY: usize = 100;

/// The state of one alert instance (rule x label set).
///
/// `Pending` is only ever produced by the state manager; evaluator
/// classifications are limited to the other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Normal,
    Pending,
    Alerting,
    NoData,
    Error,
}

impl State {
    /// True for states that carry a heartbeat TTL (`ends_at`), i.e. every
    /// state other than Normal.
    pub fn needs_heartbeat(&self) -> bool {
        !matches!(self, State::Normal)
    }

    /// True for states a notification channel may care about.
    pub fn is_firing(&self) -> bool {
        matches!(self, State::Alerting | State::NoData | State::Error)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Normal => "normal",
            State::Pending => "pending",
            State::Alerting => "alerting",
            State::NoData => "no_data",
            State::Error => "error",
        };
        f.write_str(s)
    }
}

/// One historical evaluation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub evaluated_at: DateTime<Utc>,
    pub state: State,
    /// Captured numeric values per query ref, used for template expansion.
    pub values: HashMap<String, Option<f64>>,
}

/// Persistent, cached state for one (org, rule, fingerprint) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertInstance {
    pub org_id: i64,
    pub rule_uid: String,
    /// Canonical fingerprint of `labels`; the cache and storage key.
    pub fingerprint: String,
    /// Merged rule identity labels + series labels.
    pub labels: LabelSet,
    pub state: State,
    /// Set on the tick that causes a transition into a non-Normal state.
    pub starts_at: Option<DateTime<Utc>>,
    /// Heartbeat expiry; refreshed on every non-Normal tick.
    pub ends_at: Option<DateTime<Utc>>,
    pub last_eval_time: DateTime<Utc>,
    pub eval_duration: Duration,
    /// Bounded history of recent evaluations, newest last.
    pub history: Vec<Evaluation>,
    /// Annotations with templates expanded against this instance's labels.
    pub annotations: HashMap<String, String>,
    /// Last per-instance processing error (e.g. template expansion).
    pub last_error: Option<String>,
}

impl AlertInstance {
    pub fn new(org_id: i64, rule_uid: impl Into<String>, labels: LabelSet) -> Self {
        let fingerprint = labels.fingerprint();
        Self {
            org_id,
            rule_uid: rule_uid.into(),
            fingerprint,
            labels,
            state: State::Normal,
            starts_at: None,
            ends_at: None,
            last_eval_time: DateTime::<Utc>::MIN_UTC,
            eval_duration: Duration::ZERO,
            history: Vec::new(),
            annotations: HashMap::new(),
            last_error: None,
        }
    }

    /// Append an evaluation, discarding the oldest beyond the cap.
    pub fn push_evaluation(&mut self, eval: Evaluation) {
        self.history.push(eval);
        if self.history.len() > MAX_EVALUATION_HISTORY {
            let excess = self.history.len() - MAX_EVALUATION_HISTORY;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut instance = AlertInstance::new(1, "r", LabelSet::new());
        for i in 0..(MAX_EVALUATION_HISTORY + 20) {
            instance.push_evaluation(Evaluation {
                evaluated_at: Utc::now(),
                state: if i % 2 == 0 { State::Normal } else { State::Alerting },
                values: HashMap::new(),
            });
        }
        assert_eq!(instance.history.len(), MAX_EVALUATION_HISTORY);
    }

    #[test]
    fn test_state_heartbeat() {
        assert!(!State::Normal.needs_heartbeat());
        assert!(State::Pending.needs_heartbeat());
        assert!(State::Alerting.needs_heartbeat());
        assert!(State::NoData.is_firing());
        assert!(!State::Pending.is_firing());
    }
}
