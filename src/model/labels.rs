//! Label sets and canonical fingerprints

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An order-independent set of string labels attached to a series or an
/// alert instance. Backed by a sorted map so iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(BTreeMap<String, String>);

/// Reserved label carrying the rule title.
pub const ALERT_NAME_LABEL: &str = "alertname";
/// Reserved label carrying the rule UID.
pub const RULE_UID_LABEL: &str = "__alert_rule_uid__";
/// Reserved label carrying the namespace UID.
pub const NAMESPACE_UID_LABEL: &str = "__alert_rule_namespace_uid__";

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` over this set, returning a new set. Keys from `other`
    /// win on conflict.
    pub fn merged(&self, other: &LabelSet) -> LabelSet {
        let mut out = self.0.clone();
        for (k, v) in &other.0 {
            out.insert(k.clone(), v.clone());
        }
        LabelSet(out)
    }

    /// Canonical fingerprint: a key-sorted JSON array of `[key, value]`
    /// pairs. Insertion order never affects the encoding, so the same
    /// labels always map to the same cache/storage key.
    pub fn fingerprint(&self) -> String {
        let pairs: Vec<[&str; 2]> = self
            .0
            .iter()
            .map(|(k, v)| [k.as_str(), v.as_str()])
            .collect();
        // Serializing string pairs cannot fail.
        serde_json::to_string(&pairs).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a: LabelSet = [("zone", "eu"), ("host", "web-1"), ("app", "api")]
            .into_iter()
            .collect();
        let b: LabelSet = [("app", "api"), ("zone", "eu"), ("host", "web-1")]
            .into_iter()
            .collect();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(
            a.fingerprint(),
            r#"[["app","api"],["host","web-1"],["zone","eu"]]"#
        );
    }

    #[test]
    fn test_merged_prefers_other() {
        let base: LabelSet = [("a", "1"), ("b", "2")].into_iter().collect();
        let over: LabelSet = [("b", "3"), ("c", "4")].into_iter().collect();

        let merged = base.merged(&over);
        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(merged.get("c"), Some("4"));
    }

    #[test]
    fn test_empty_fingerprint() {
        assert_eq!(LabelSet::new().fingerprint(), "[]");
    }
}
