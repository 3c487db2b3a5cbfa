//! Core data model: rules, label sets, series and per-instance state

pub mod instance;
pub mod labels;
pub mod rule;
pub mod series;

pub use instance::{AlertInstance, Evaluation, State, MAX_EVALUATION_HISTORY};
pub use labels::{LabelSet, ALERT_NAME_LABEL, NAMESPACE_UID_LABEL, RULE_UID_LABEL};
pub use rule::{duration_serde, AlertRule, ExecErrorPolicy, NoDataPolicy};
pub use series::{Point, TimeSeries};
