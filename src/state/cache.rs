//! Instance state cache
//!
//! Caches one live `AlertInstance` per (rule, fingerprint). The fingerprint
//! is computed from the merged label set: series labels over rule labels,
//! with the rule identity labels always present.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::model::{
    AlertInstance, AlertRule, LabelSet, ALERT_NAME_LABEL, NAMESPACE_UID_LABEL, RULE_UID_LABEL,
};

/// In-memory cache of alert instances for one organization.
#[derive(Default)]
pub struct InstanceCache {
    // rule UID -> fingerprint -> instance
    states: RwLock<HashMap<String, HashMap<String, AlertInstance>>>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge rule labels, series labels and the rule identity labels into
    /// the instance label set.
    pub fn instance_labels(rule: &AlertRule, series_labels: &LabelSet) -> LabelSet {
        let mut labels = rule.labels.merged(series_labels);
        labels.insert(ALERT_NAME_LABEL, rule.title.clone());
        labels.insert(RULE_UID_LABEL, rule.uid.clone());
        labels.insert(NAMESPACE_UID_LABEL, rule.namespace_uid.clone());
        labels
    }

    /// Fetch the live instance for the merged label set, creating it on
    /// first observation.
    pub fn get_or_create(&self, rule: &AlertRule, series_labels: &LabelSet) -> AlertInstance {
        let labels = Self::instance_labels(rule, series_labels);
        let fingerprint = labels.fingerprint();

        let mut states = self.states.write();
        states
            .entry(rule.uid.clone())
            .or_default()
            .entry(fingerprint)
            .or_insert_with(|| AlertInstance::new(rule.org_id, rule.uid.clone(), labels))
            .clone()
    }

    pub fn get(&self, rule_uid: &str, fingerprint: &str) -> Option<AlertInstance> {
        self.states
            .read()
            .get(rule_uid)
            .and_then(|m| m.get(fingerprint))
            .cloned()
    }

    pub fn set(&self, instance: AlertInstance) {
        let mut states = self.states.write();
        states
            .entry(instance.rule_uid.clone())
            .or_default()
            .insert(instance.fingerprint.clone(), instance);
    }

    pub fn remove(&self, rule_uid: &str, fingerprint: &str) -> Option<AlertInstance> {
        self.states
            .write()
            .get_mut(rule_uid)
            .and_then(|m| m.remove(fingerprint))
    }

    /// All cached fingerprints for a rule.
    pub fn fingerprints(&self, rule_uid: &str) -> Vec<String> {
        self.states
            .read()
            .get(rule_uid)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.states.read().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> AlertRule {
        let mut rule = AlertRule::new(1, "rule-1", "test_title");
        rule.namespace_uid = "ns-1".to_string();
        rule.labels = [("label", "test")].into_iter().collect();
        rule
    }

    #[test]
    fn test_identity_labels_are_merged() {
        let cache = InstanceCache::new();
        let series: LabelSet = [("instance_label", "test")].into_iter().collect();
        let instance = cache.get_or_create(&rule(), &series);

        assert_eq!(instance.labels.get(ALERT_NAME_LABEL), Some("test_title"));
        assert_eq!(instance.labels.get(RULE_UID_LABEL), Some("rule-1"));
        assert_eq!(instance.labels.get(NAMESPACE_UID_LABEL), Some("ns-1"));
        assert_eq!(instance.labels.get("label"), Some("test"));
        assert_eq!(instance.labels.get("instance_label"), Some("test"));
        assert_eq!(
            instance.fingerprint,
            r#"[["__alert_rule_namespace_uid__","ns-1"],["__alert_rule_uid__","rule-1"],["alertname","test_title"],["instance_label","test"],["label","test"]]"#
        );
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let cache = InstanceCache::new();
        let series: LabelSet = [("host", "a")].into_iter().collect();

        let first = cache.get_or_create(&rule(), &series);
        let second = cache.get_or_create(&rule(), &series);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let cache = InstanceCache::new();
        let series: LabelSet = [("host", "a")].into_iter().collect();
        let instance = cache.get_or_create(&rule(), &series);

        assert!(cache.remove("rule-1", &instance.fingerprint).is_some());
        assert!(cache.get("rule-1", &instance.fingerprint).is_none());
        assert!(cache.is_empty());
    }
}
