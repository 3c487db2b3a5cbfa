//! Test notifications
//!
//! Builds a fabricated firing alert and pushes it through a single
//! channel, bypassing notifier state tracking so the send always
//! happens.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::bus::{BusError, DispatchBus, NotificationChannel};
use crate::model::{AlertInstance, AlertRule, LabelSet, State};
use crate::state::StateTransition;

use super::channel::ValidationError;
use super::context::NotifyContext;
use super::dispatcher::Dispatcher;
use super::registry::ChannelRegistry;

#[derive(Debug, thiserror::Error)]
pub enum TestNotificationError {
    #[error("request must supply either an existing channel uid or an inline type")]
    MissingTarget,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("test notification failed to send")]
    SendFailed,
}

/// A test request either names a stored channel or supplies an inline
/// configuration. Inline requests referencing a stored channel by id
/// inherit its secure settings for fields the request omits.
#[derive(Debug, Clone, Deserialize)]
pub struct TestNotificationRequest {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(rename = "secureSettings", default)]
    pub secure_settings: HashMap<String, String>,
}

impl TestNotificationRequest {
    fn resolve(
        &self,
        bus: &dyn DispatchBus,
        org_id: i64,
    ) -> Result<NotificationChannel, TestNotificationError> {
        let stored = match &self.uid {
            Some(uid) => bus
                .get_notification_channels(org_id, std::slice::from_ref(uid))?
                .into_iter()
                .next(),
            None => None,
        };

        // Inline fields override the stored channel; stored secure settings
        // backfill secrets the request left out.
        let mut channel = match (stored, &self.kind) {
            (Some(stored), _) => stored,
            (None, Some(kind)) => NotificationChannel {
                id: 0,
                uid: String::new(),
                org_id,
                name: self.name.clone().unwrap_or_else(|| "test".to_string()),
                kind: kind.clone(),
                settings: serde_json::Value::Object(Default::default()),
                secure_settings: HashMap::new(),
                send_reminder: false,
                frequency: None,
                disable_resolve_message: false,
                upload_image: false,
            },
            (None, None) => return Err(TestNotificationError::MissingTarget),
        };

        if let Some(kind) = &self.kind {
            channel.kind = kind.clone();
        }
        if let Some(settings) = &self.settings {
            channel.settings = settings.clone();
        }
        for (key, value) in &self.secure_settings {
            channel.secure_settings.insert(key.clone(), value.clone());
        }
        Ok(channel)
    }
}

/// The synthetic rule and instance every test notification renders.
pub fn test_rule(org_id: i64) -> AlertRule {
    let mut annotations = HashMap::new();
    annotations.insert(
        "summary".to_string(),
        "Someone is testing the alert notification within Klaxon.".to_string(),
    );
    let mut rule = AlertRule::new(org_id, "test-notification", "Test notification");
    rule.message = "Someone is testing the alert notification within Klaxon.".to_string();
    rule.annotations = annotations;
    rule
}

fn test_transition(rule: &AlertRule) -> StateTransition {
    let mut labels = LabelSet::new();
    labels.insert("alertname", &rule.title);
    labels.insert("instance", "klaxon-test");
    let mut instance = AlertInstance::new(rule.org_id, &rule.uid, labels);
    instance.state = State::Alerting;
    instance.starts_at = Some(Utc::now());
    instance.last_eval_time = Utc::now();
    StateTransition {
        previous_state: State::Normal,
        instance,
    }
}

/// Resolve the target channel and fire a synthetic alert through it.
pub async fn send_test_notification(
    bus: Arc<dyn DispatchBus>,
    dispatcher: &Dispatcher,
    registry: &ChannelRegistry,
    org_id: i64,
    request: &TestNotificationRequest,
) -> Result<(), TestNotificationError> {
    let channel = request.resolve(bus.as_ref(), org_id)?;
    let notifier = registry.build(&channel)?;

    let rule = test_rule(org_id);
    let transition = test_transition(&rule);
    let mut ctx = NotifyContext::new(&rule, &transition);
    ctx.is_test_run = true;

    if dispatcher.send_test(&ctx, &notifier).await {
        Ok(())
    } else {
        Err(TestNotificationError::SendFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::metrics::Metrics;
    use serde_json::json;

    fn stored_channel() -> NotificationChannel {
        let mut secure = HashMap::new();
        secure.insert("url".to_string(), "http://stored-hook".to_string());
        NotificationChannel {
            id: 3,
            uid: "slack-1".to_string(),
            org_id: 1,
            name: "slack".to_string(),
            kind: "slack".to_string(),
            settings: json!({}),
            secure_settings: secure,
            send_reminder: false,
            frequency: None,
            disable_resolve_message: false,
            upload_image: false,
        }
    }

    #[test]
    fn test_resolve_requires_target() {
        let bus = InMemoryBus::new();
        let request = TestNotificationRequest {
            uid: None,
            kind: None,
            name: None,
            settings: None,
            secure_settings: HashMap::new(),
        };
        assert!(matches!(
            request.resolve(&bus, 1),
            Err(TestNotificationError::MissingTarget)
        ));
    }

    #[test]
    fn test_stored_secure_settings_backfill() {
        let bus = InMemoryBus::new();
        bus.add_channel(stored_channel());

        let request = TestNotificationRequest {
            uid: Some("slack-1".to_string()),
            kind: None,
            name: None,
            settings: Some(json!({"recipient": "#alerts"})),
            secure_settings: HashMap::new(),
        };
        let channel = request.resolve(&bus, 1).unwrap();
        assert_eq!(channel.secure_settings["url"], "http://stored-hook");
        assert_eq!(channel.settings["recipient"], "#alerts");
    }

    #[tokio::test]
    async fn test_inline_email_sends_without_state_tracking() {
        let bus: Arc<dyn DispatchBus> = Arc::new(InMemoryBus::new());
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(bus.clone(), metrics.clone());
        let registry = ChannelRegistry::with_defaults();

        let request = TestNotificationRequest {
            uid: None,
            kind: Some("email".to_string()),
            name: None,
            settings: Some(json!({"addresses": "ops@example.com"})),
            secure_settings: HashMap::new(),
        };

        send_test_notification(bus, &dispatcher, &registry, 1, &request)
            .await
            .unwrap();
        assert_eq!(metrics.notifications_sent(), 1);
    }
}
