//! Notification dispatch
//!
//! For every state transition the dispatcher resolves the rule's channels,
//! applies each channel's send policy, claims the send with an optimistic
//! version check, delivers, and records completion. Losing the version
//! race means another evaluator already owns this send and is a benign
//! no-op.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::{BusError, DispatchBus, NotifierState};
use crate::metrics::Metrics;
use crate::model::AlertRule;
use crate::state::StateTransition;

use super::channel::Notifier;
use super::context::NotifyContext;
use super::image::{ImageUploader, NoopRenderer, NoopUploader, Renderer};
use super::registry::ChannelRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Bus(#[from] BusError),
}

pub struct Dispatcher {
    bus: Arc<dyn DispatchBus>,
    registry: ChannelRegistry,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    renderer: Arc<dyn Renderer>,
    uploader: Arc<dyn ImageUploader>,
    notification_timeout: Duration,
    render_timeout: Duration,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn DispatchBus>, metrics: Arc<Metrics>) -> Self {
        let notification_timeout = Duration::from_secs(30);
        Self {
            bus,
            registry: ChannelRegistry::with_defaults(),
            client: reqwest::Client::new(),
            metrics,
            renderer: Arc::new(NoopRenderer),
            uploader: Arc::new(NoopUploader),
            notification_timeout,
            render_timeout: notification_timeout / 2,
        }
    }

    pub fn with_registry(mut self, registry: ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ImageUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self.render_timeout = timeout / 2;
        self
    }

    /// Dispatch one state transition. Returns the number of notifications
    /// delivered.
    pub async fn send_if_needed(
        &self,
        rule: &AlertRule,
        transition: &StateTransition,
    ) -> Result<usize, DispatchError> {
        if !transition.needs_notification() {
            return Ok(0);
        }

        let mut ctx = NotifyContext::new(rule, transition);
        ctx.rule_url = ctx.lookup_rule_url(self.bus.as_ref());

        let channels = self
            .bus
            .get_notification_channels(rule.org_id, &rule.channel_uids)?;

        let mut pending = Vec::new();
        for config in &channels {
            let notifier = match self.registry.build(config) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(
                        channel = %config.name,
                        uid = %config.uid,
                        error = %err,
                        "skipping misconfigured notification channel"
                    );
                    continue;
                }
            };

            let prev = match self.bus.get_or_create_notifier_state(
                rule.org_id,
                notifier.config.id,
                ctx.instance_id(),
            ) {
                Ok(prev) => prev,
                Err(err) => {
                    tracing::error!(
                        channel = %config.name,
                        uid = %config.uid,
                        error = %err,
                        "could not get notification state, skipping channel"
                    );
                    continue;
                }
            };
            if notifier.should_notify(&ctx, &prev) {
                pending.push((notifier, prev));
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }

        self.attach_image(&mut ctx, &pending).await;

        let mut sent = 0;
        for (notifier, prev) in pending {
            if self.send_one(&notifier, &ctx, &prev).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Send through every notifier regardless of state tracking. Used for
    /// test notifications from the API.
    pub async fn send_test(&self, ctx: &NotifyContext<'_>, notifier: &Notifier) -> bool {
        self.deliver(notifier, ctx).await
    }

    /// Claim the send, deliver, and mark complete. Returns whether a
    /// notification actually went out from this process.
    async fn send_one(
        &self,
        notifier: &Notifier,
        ctx: &NotifyContext<'_>,
        prev: &NotifierState,
    ) -> Result<bool, DispatchError> {
        let version = match self.bus.set_notifier_state_to_pending(
            notifier.config.org_id,
            notifier.config.id,
            &prev.instance_id,
            prev.version,
        ) {
            Ok(version) => version,
            Err(err) if err.is_version_conflict() => {
                self.metrics.inc_version_conflicts();
                tracing::debug!(
                    channel = %notifier.config.name,
                    instance_id = %prev.instance_id,
                    "another node claimed this notification"
                );
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        if !self.deliver(notifier, ctx).await {
            // Left pending so a later tick retries the send.
            return Ok(false);
        }

        self.bus.set_notifier_state_to_complete(
            notifier.config.org_id,
            notifier.config.id,
            &prev.instance_id,
            version,
        )?;
        Ok(true)
    }

    async fn deliver(&self, notifier: &Notifier, ctx: &NotifyContext<'_>) -> bool {
        let outcome = tokio::time::timeout(
            self.notification_timeout,
            notifier.kind.notify(&self.client, ctx),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.metrics.inc_notifications_sent();
                tracing::info!(
                    channel = %notifier.config.name,
                    kind = notifier.kind.type_name(),
                    rule_uid = %ctx.rule.uid,
                    state = %ctx.state(),
                    "notification sent"
                );
                true
            }
            Ok(Err(err)) => {
                self.metrics.inc_notifications_failed();
                tracing::error!(
                    channel = %notifier.config.name,
                    kind = notifier.kind.type_name(),
                    rule_uid = %ctx.rule.uid,
                    error = %err,
                    "notification failed"
                );
                false
            }
            Err(_) => {
                self.metrics.inc_notifications_failed();
                tracing::error!(
                    channel = %notifier.config.name,
                    kind = notifier.kind.type_name(),
                    rule_uid = %ctx.rule.uid,
                    timeout_secs = self.notification_timeout.as_secs(),
                    "notification timed out"
                );
                false
            }
        }
    }

    /// Render and upload the panel image once if any selected channel
    /// wants it. Rendering failures degrade to a plain notification.
    async fn attach_image(
        &self,
        ctx: &mut NotifyContext<'_>,
        pending: &[(Notifier, NotifierState)],
    ) {
        let wanted = pending
            .iter()
            .any(|(n, _)| n.config.upload_image && n.kind.supports_image());
        if !wanted {
            return;
        }

        let rendered = tokio::time::timeout(self.render_timeout, self.renderer.render(ctx.rule));
        let path = match rendered.await {
            Ok(Ok(path)) => path,
            Ok(Err(err)) => {
                tracing::warn!(rule_uid = %ctx.rule.uid, error = %err, "image render failed");
                return;
            }
            Err(_) => {
                tracing::warn!(rule_uid = %ctx.rule.uid, "image render timed out");
                return;
            }
        };

        match self.uploader.upload(&path).await {
            Ok(url) => {
                ctx.image_url = Some(url);
                ctx.image_path = Some(path);
            }
            Err(err) => {
                // Keep the local path so channels that embed files still can.
                tracing::warn!(rule_uid = %ctx.rule.uid, error = %err, "image upload failed");
                ctx.image_path = Some(path);
            }
        }
    }
}
