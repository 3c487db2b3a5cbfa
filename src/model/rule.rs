//! Alert rule definitions
//!
//! Rules are read-only inputs to the evaluation pipeline; they are created
//! and updated by rule management, which is outside this crate.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::labels::LabelSet;

/// What to do when a rule evaluation produces no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Surface the NoData state as-is.
    NoData,
    /// Treat no data as a firing condition.
    Alerting,
    /// Keep the instance in whatever state it was.
    KeepLast,
}

/// What to do when a rule evaluation fails outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrorPolicy {
    /// Surface the Error state as-is.
    Error,
    /// Treat an execution error as a firing condition.
    Alerting,
    /// Keep the instance in whatever state it was.
    KeepLast,
}

/// An alert rule: identity, evaluation cadence, hysteresis and the outcome
/// policies, plus static labels/annotations (which may contain template
/// directives) and the notification channels to fan out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub org_id: i64,
    pub uid: String,
    pub namespace_uid: String,
    pub title: String,
    /// Evaluation interval.
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Minimum continuous-firing time before Pending promotes to Alerting.
    #[serde(with = "duration_serde", rename = "for")]
    pub for_duration: Duration,
    pub no_data_policy: NoDataPolicy,
    pub exec_error_policy: ExecErrorPolicy,
    /// Static labels merged into every instance of this rule.
    #[serde(default)]
    pub labels: LabelSet,
    /// Annotations; values may contain `{{ $labels.x }}` style directives.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Human-readable message attached to notifications; templated.
    #[serde(default)]
    pub message: String,
    /// UIDs of the notification channels this rule fans out to.
    #[serde(default)]
    pub channel_uids: Vec<String>,
    /// Datasource the rule queries.
    pub datasource_id: i64,
    /// Dashboard/panel the rule originates from, for image rendering.
    pub dashboard_id: i64,
    pub panel_id: i64,
}

impl AlertRule {
    pub fn new(org_id: i64, uid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
            namespace_uid: String::new(),
            title: title.into(),
            interval: Duration::from_secs(60),
            for_duration: Duration::ZERO,
            no_data_policy: NoDataPolicy::NoData,
            exec_error_policy: ExecErrorPolicy::Error,
            labels: LabelSet::new(),
            annotations: HashMap::new(),
            message: String::new(),
            channel_uids: Vec::new(),
            datasource_id: 0,
            dashboard_id: 0,
            panel_id: 0,
        }
    }

    pub fn with_for(mut self, for_duration: Duration) -> Self {
        self.for_duration = for_duration;
        self
    }

    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_channels(mut self, uids: Vec<String>) -> Self {
        self.channel_uids = uids;
        self
    }
}

/// Duration serialization helper
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_builder_defaults() {
        let rule = AlertRule::new(1, "rule-1", "High latency");
        assert_eq!(rule.for_duration, Duration::ZERO);
        assert_eq!(rule.no_data_policy, NoDataPolicy::NoData);
        assert_eq!(rule.exec_error_policy, ExecErrorPolicy::Error);
    }

    #[test]
    fn test_rule_roundtrips_through_json() {
        let rule = AlertRule::new(1, "rule-1", "High latency")
            .with_for(Duration::from_secs(60))
            .with_channels(vec!["chan-1".to_string()]);

        let json = serde_json::to_string(&rule).unwrap();
        let back: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uid, "rule-1");
        assert_eq!(back.for_duration, Duration::from_secs(60));
        assert_eq!(back.channel_uids, vec!["chan-1"]);
    }
}
