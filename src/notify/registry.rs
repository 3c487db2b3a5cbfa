//! Channel type registry
//!
//! The set of known channel types is an explicit value constructed at
//! startup and handed to the dispatcher, so tests can build registries
//! with any subset of types.

use std::collections::BTreeMap;

use crate::bus::NotificationChannel;

use super::channel::{ChannelKind, Notifier, ValidationError};

/// Static description of one channel type.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelDescriptor {
    pub type_name: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// All channel types this process knows how to build.
pub struct ChannelRegistry {
    descriptors: BTreeMap<&'static str, ChannelDescriptor>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: BTreeMap::new(),
        }
    }

    /// Registry with every built-in channel type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ChannelDescriptor {
            type_name: "email",
            name: "Email",
            description: "Sends notifications using configured email addresses",
        });
        registry.register(ChannelDescriptor {
            type_name: "webhook",
            name: "Webhook",
            description: "Sends HTTP POST requests to a URL",
        });
        registry.register(ChannelDescriptor {
            type_name: "kafka",
            name: "Kafka REST Proxy",
            description: "Sends notifications to a Kafka topic via REST proxy",
        });
        registry.register(ChannelDescriptor {
            type_name: "slack",
            name: "Slack",
            description: "Sends notifications to Slack via incoming webhooks",
        });
        registry.register(ChannelDescriptor {
            type_name: "pagerduty",
            name: "PagerDuty",
            description: "Sends notifications to PagerDuty",
        });
        registry
    }

    pub fn register(&mut self, descriptor: ChannelDescriptor) {
        self.descriptors.insert(descriptor.type_name, descriptor);
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&ChannelDescriptor> {
        self.descriptors.get(type_name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.descriptors.values()
    }

    /// Construct a notifier from a stored channel configuration. Unknown
    /// types are rejected before settings are inspected.
    pub fn build(&self, config: &NotificationChannel) -> Result<Notifier, ValidationError> {
        if self.descriptor(&config.kind).is_none() {
            return Err(ValidationError {
                reason: format!("unsupported notification type {:?}", config.kind),
            });
        }
        let kind = ChannelKind::from_config(config)?;
        Ok(Notifier {
            config: config.clone(),
            kind,
        })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn channel(kind: &str, settings: serde_json::Value) -> NotificationChannel {
        NotificationChannel {
            id: 1,
            uid: "chan".to_string(),
            org_id: 1,
            name: "c".to_string(),
            kind: kind.to_string(),
            settings,
            secure_settings: HashMap::new(),
            send_reminder: false,
            frequency: None,
            disable_resolve_message: false,
            upload_image: false,
        }
    }

    #[test]
    fn test_defaults_cover_builtins() {
        let registry = ChannelRegistry::with_defaults();
        for t in ["email", "webhook", "kafka", "slack", "pagerduty"] {
            assert!(registry.descriptor(t).is_some(), "missing {}", t);
        }
    }

    #[test]
    fn test_build_rejects_unknown_type() {
        let registry = ChannelRegistry::with_defaults();
        let err = registry.build(&channel("telex", json!({}))).unwrap_err();
        assert!(err.reason.contains("unsupported"));
    }

    #[test]
    fn test_build_validates_settings() {
        let registry = ChannelRegistry::with_defaults();
        assert!(registry.build(&channel("webhook", json!({}))).is_err());
        let notifier = registry
            .build(&channel("webhook", json!({"url": "http://x"})))
            .unwrap();
        assert_eq!(notifier.kind.type_name(), "webhook");
    }

    #[test]
    fn test_empty_registry_builds_nothing() {
        let registry = ChannelRegistry::new();
        assert!(registry
            .build(&channel("webhook", json!({"url": "http://x"})))
            .is_err());
    }
}
