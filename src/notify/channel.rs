//! Notification channels
//!
//! Channel variants form a closed tagged union behind one `notify`
//! capability. Each kind validates its required settings at construction;
//! a malformed configuration disables that one channel and nothing else.

use std::collections::HashMap;

use serde_json::json;

use crate::bus::{NotificationChannel, NotifierState, NotifierStatus};
use crate::model::State;

use super::context::{state_description, NotifyContext};

/// Raised when a channel configuration is missing a required field.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid channel configuration: {reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    fn missing(field: &str) -> Self {
        Self {
            reason: format!("could not find required field {:?} in settings", field),
        }
    }
}

/// Delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{kind} endpoint returned status {status}")]
    BadStatus { kind: &'static str, status: u16 },
}

/// One concrete channel kind with its validated settings.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelKind {
    Email {
        addresses: Vec<String>,
        single_email: bool,
    },
    Webhook {
        url: String,
        http_method: String,
        username: Option<String>,
        password: Option<String>,
    },
    /// Kafka REST proxy producer.
    Kafka {
        endpoint: String,
        topic: String,
    },
    Slack {
        webhook_url: String,
        recipient: Option<String>,
    },
    PagerDuty {
        integration_key: String,
        auto_resolve: bool,
    },
}

impl ChannelKind {
    /// Parse and validate a stored channel configuration. Secure settings
    /// override plain ones for secret-bearing fields.
    pub fn from_config(config: &NotificationChannel) -> Result<Self, ValidationError> {
        let settings = &config.settings;
        let secure = &config.secure_settings;

        match config.kind.as_str() {
            "email" => {
                let addresses = required_str(settings, "addresses")?;
                let addresses: Vec<String> = addresses
                    .split([';', ',', '\n'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if addresses.is_empty() {
                    return Err(ValidationError::missing("addresses"));
                }
                Ok(ChannelKind::Email {
                    addresses,
                    single_email: opt_bool(settings, "singleEmail").unwrap_or(false),
                })
            }
            "webhook" => Ok(ChannelKind::Webhook {
                url: required_str(settings, "url")?,
                http_method: opt_str(settings, "httpMethod").unwrap_or_else(|| "POST".to_string()),
                username: opt_str(settings, "username"),
                password: secret(secure, settings, "password"),
            }),
            "kafka" => Ok(ChannelKind::Kafka {
                endpoint: required_str(settings, "kafkaRestProxy")?,
                topic: required_str(settings, "kafkaTopic")?,
            }),
            "slack" => Ok(ChannelKind::Slack {
                webhook_url: secret(secure, settings, "url")
                    .ok_or_else(|| ValidationError::missing("url"))?,
                recipient: opt_str(settings, "recipient"),
            }),
            "pagerduty" => Ok(ChannelKind::PagerDuty {
                integration_key: secret(secure, settings, "integrationKey")
                    .ok_or_else(|| ValidationError::missing("integrationKey"))?,
                auto_resolve: opt_bool(settings, "autoResolve").unwrap_or(true),
            }),
            other => Err(ValidationError {
                reason: format!("unsupported notification type {:?}", other),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelKind::Email { .. } => "email",
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Kafka { .. } => "kafka",
            ChannelKind::Slack { .. } => "slack",
            ChannelKind::PagerDuty { .. } => "pagerduty",
        }
    }

    /// Whether this kind can attach a rendered panel image.
    pub fn supports_image(&self) -> bool {
        !matches!(self, ChannelKind::Kafka { .. })
    }

    /// Deliver one notification. Webhook-style kinds POST a structured
    /// JSON payload; email has no SMTP transport wired in yet and logs the
    /// rendered notification instead.
    pub async fn notify(
        &self,
        client: &reqwest::Client,
        ctx: &NotifyContext<'_>,
    ) -> Result<(), NotifyError> {
        match self {
            ChannelKind::Email {
                addresses,
                single_email,
            } => {
                tracing::info!(
                    recipients = ?addresses,
                    single_email,
                    title = %ctx.title(),
                    message = %ctx.message(),
                    "email notification"
                );
                Ok(())
            }
            ChannelKind::Webhook {
                url,
                http_method,
                username,
                password,
            } => {
                let payload = json!({
                    "title": ctx.title(),
                    "ruleUid": ctx.rule.uid,
                    "orgId": ctx.rule.org_id,
                    "state": ctx.state().to_string(),
                    "message": ctx.message(),
                    "labels": ctx.transition.instance.labels,
                    "annotations": ctx.transition.instance.annotations,
                    "ruleUrl": ctx.rule_url,
                    "imageUrl": ctx.image_url,
                });

                let mut request = match http_method.to_uppercase().as_str() {
                    "PUT" => client.put(url),
                    _ => client.post(url),
                };
                if let Some(username) = username {
                    request = request.basic_auth(username, password.as_deref());
                }

                let response = request.json(&payload).send().await?;
                check_status("webhook", response)
            }
            ChannelKind::Kafka { endpoint, topic } => {
                let mut details = String::new();
                for (key, value) in ctx.transition.instance.labels.iter() {
                    details.push_str(&format!("{}: {}\n", key, value));
                }

                let payload = json!({
                    "records": [{
                        "value": {
                            "alert_state": ctx.state().to_string(),
                            "description": format!("{} - {}", ctx.rule.title, ctx.message()),
                            "client": "Klaxon",
                            "details": details,
                            "incident_key": ctx.instance_id(),
                            "client_url": ctx.rule_url,
                        }
                    }]
                });

                let url = format!("{}/topics/{}", endpoint, topic);
                let response = client
                    .post(&url)
                    .header("Content-Type", "application/vnd.kafka.json.v2+json")
                    .header("Accept", "application/vnd.kafka.v2+json")
                    .json(&payload)
                    .send()
                    .await?;
                check_status("kafka", response)
            }
            ChannelKind::Slack {
                webhook_url,
                recipient,
            } => {
                let desc = state_description(ctx.state());
                let mut attachment = json!({
                    "color": desc.color,
                    "title": ctx.title(),
                    "title_link": ctx.rule_url,
                    "text": ctx.message(),
                    "fallback": ctx.title(),
                });
                if let Some(image_url) = &ctx.image_url {
                    attachment["image_url"] = json!(image_url);
                }

                let mut payload = json!({ "attachments": [attachment] });
                if let Some(recipient) = recipient {
                    payload["channel"] = json!(recipient);
                }

                let response = client.post(webhook_url).json(&payload).send().await?;
                check_status("slack", response)
            }
            ChannelKind::PagerDuty {
                integration_key,
                auto_resolve,
            } => {
                let resolved = ctx.transition.is_resolved();
                if resolved && !auto_resolve {
                    tracing::debug!(
                        rule_uid = %ctx.rule.uid,
                        "pagerduty auto-resolve disabled, skipping resolve event"
                    );
                    return Ok(());
                }

                let payload = json!({
                    "routing_key": integration_key,
                    "event_action": if resolved { "resolve" } else { "trigger" },
                    "dedup_key": ctx.instance_id(),
                    "payload": {
                        "summary": ctx.title(),
                        "source": "klaxon",
                        "severity": "critical",
                        "custom_details": {
                            "state": ctx.state().to_string(),
                            "message": ctx.message(),
                            "labels": ctx.transition.instance.labels,
                        },
                    },
                    "client": "Klaxon",
                    "client_url": ctx.rule_url,
                });

                let response = client
                    .post("https://events.pagerduty.com/v2/enqueue")
                    .json(&payload)
                    .send()
                    .await?;
                check_status("pagerduty", response)
            }
        }
    }
}

fn check_status(kind: &'static str, response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::BadStatus {
            kind,
            status: status.as_u16(),
        })
    }
}

fn opt_str(settings: &serde_json::Value, field: &str) -> Option<String> {
    settings
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn opt_bool(settings: &serde_json::Value, field: &str) -> Option<bool> {
    settings.get(field).and_then(|v| v.as_bool())
}

fn required_str(settings: &serde_json::Value, field: &str) -> Result<String, ValidationError> {
    opt_str(settings, field).ok_or_else(|| ValidationError::missing(field))
}

/// Secure settings take precedence over plain ones for secrets.
fn secret(
    secure: &HashMap<String, String>,
    settings: &serde_json::Value,
    field: &str,
) -> Option<String> {
    secure
        .get(field)
        .filter(|s| !s.is_empty())
        .cloned()
        .or_else(|| opt_str(settings, field))
}

/// A constructed channel plus the stored metadata that governs when it
/// fires.
#[derive(Debug)]
pub struct Notifier {
    pub config: NotificationChannel,
    pub kind: ChannelKind,
}

impl Notifier {
    /// Channel-level send policy.
    ///
    /// - never notify on Pending;
    /// - notify on every state change into a firing state;
    /// - resolved notifications only when the channel has not disabled
    ///   them;
    /// - unchanged firing ticks retry a send still marked pending, and
    ///   otherwise fire only as reminders gated on the channel's frequency.
    pub fn should_notify(&self, ctx: &NotifyContext<'_>, prev: &NotifierState) -> bool {
        let state = ctx.state();
        if state == State::Pending {
            return false;
        }

        if ctx.transition.is_resolved() {
            return !self.config.disable_resolve_message;
        }

        if !state.is_firing() {
            return false;
        }

        if ctx.transition.changed() {
            return true;
        }

        // A send left pending is retried on the next eligible tick,
        // regardless of the reminder clock.
        if prev.status == NotifierStatus::Pending {
            return true;
        }

        // Unchanged firing tick: reminder path.
        if !self.config.send_reminder {
            return false;
        }
        let Some(frequency) = self.config.frequency else {
            return false;
        };
        match prev.sent_at {
            Some(sent_at) => {
                let elapsed = ctx.transition.instance.last_eval_time - sent_at;
                elapsed.to_std().map(|e| e >= frequency).unwrap_or(false)
            }
            None => true,
        }
    }
}
