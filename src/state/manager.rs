//! Per-instance state transitions
//!
//! Consumes evaluator classifications once per tick per fingerprint and
//! maintains the instance state machine: hysteresis delays entry into
//! Alerting, never exit, and every non-Normal state carries a heartbeat TTL
//! so a crashed evaluator cannot leave an alert firing forever.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::bus::DispatchBus;
use crate::eval::EvalResult;
use crate::metrics::Metrics;
use crate::model::{
    AlertInstance, AlertRule, Evaluation, ExecErrorPolicy, NoDataPolicy, State,
};

use super::cache::InstanceCache;
use super::template;

/// Heartbeat TTL multiplier: a firing instance expires after
/// `resend_delay * HEARTBEAT_MULTIPLIER` without a refresh.
pub const HEARTBEAT_MULTIPLIER: u32 = 3;

/// One observed state change, surfaced to the notification dispatcher.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub previous_state: State,
    pub instance: AlertInstance,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.previous_state != self.instance.state
    }

    /// Whether this tick is worth handing to the dispatcher: a firing
    /// state, or leaving one. Pending churn and Normal->Normal stay
    /// internal.
    pub fn needs_notification(&self) -> bool {
        self.instance.state.is_firing() || self.previous_state.is_firing()
    }

    /// The alert recovered on this tick.
    pub fn is_resolved(&self) -> bool {
        self.previous_state.is_firing() && self.instance.state == State::Normal
    }
}

/// Maintains alert instance state for one organization.
pub struct StateManager {
    cache: InstanceCache,
    bus: Arc<dyn DispatchBus>,
    metrics: Arc<Metrics>,
    resend_delay: Duration,
}

impl StateManager {
    pub fn new(bus: Arc<dyn DispatchBus>, metrics: Arc<Metrics>, resend_delay: Duration) -> Self {
        Self {
            cache: InstanceCache::new(),
            bus,
            metrics,
            resend_delay,
        }
    }

    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    /// Process one tick's evaluator verdicts for a rule. Returns one
    /// transition per processed result, changed or not, so the dispatcher
    /// can also see unchanged firing ticks for reminder sends. Stale
    /// fingerprints absent from this tick are reconciled (evicted and
    /// deleted) before returning.
    pub fn process_results(
        &self,
        rule: &AlertRule,
        results: &[EvalResult],
    ) -> Vec<StateTransition> {
        let mut transitions = Vec::with_capacity(results.len());
        let mut seen = HashSet::with_capacity(results.len());

        for result in results {
            self.metrics.inc_evaluations();
            let transition = self.process_result(rule, result);
            seen.insert(transition.instance.fingerprint.clone());
            if transition.changed() {
                tracing::debug!(
                    rule_uid = %rule.uid,
                    org_id = rule.org_id,
                    from = %transition.previous_state,
                    to = %transition.instance.state,
                    "alert instance changed state"
                );
            }
            transitions.push(transition);
        }

        self.evict_stale(rule, &seen);
        transitions
    }

    fn process_result(&self, rule: &AlertRule, result: &EvalResult) -> StateTransition {
        let mut instance = self.cache.get_or_create(rule, &result.instance);
        let previous_state = instance.state;
        let now = result.evaluated_at;

        let classification = self.apply_policies(rule, previous_state, result.state);
        self.transition(rule, &mut instance, previous_state, classification, now);

        instance.last_eval_time = now;
        instance.eval_duration = result.duration;
        instance.push_evaluation(Evaluation {
            evaluated_at: now,
            state: result.state,
            values: result.values.clone(),
        });
        instance.last_error = result.error.clone();

        self.expand_annotations(rule, &mut instance, result);

        self.cache.set(instance.clone());
        if let Err(e) = self.bus.save_alert_instance(&instance) {
            tracing::error!(
                rule_uid = %rule.uid,
                fingerprint = %instance.fingerprint,
                error = %e,
                "failed to persist alert instance"
            );
        }

        StateTransition {
            previous_state,
            instance,
        }
    }

    /// Redirect NoData and Error classifications through the rule's
    /// policies before they reach the transition logic.
    fn apply_policies(&self, rule: &AlertRule, previous: State, classified: State) -> State {
        match classified {
            State::NoData => match rule.no_data_policy {
                NoDataPolicy::NoData => State::NoData,
                NoDataPolicy::Alerting => State::Alerting,
                NoDataPolicy::KeepLast => previous,
            },
            State::Error => match rule.exec_error_policy {
                ExecErrorPolicy::Error => State::Error,
                ExecErrorPolicy::Alerting => State::Alerting,
                ExecErrorPolicy::KeepLast => previous,
            },
            other => other,
        }
    }

    fn transition(
        &self,
        rule: &AlertRule,
        instance: &mut AlertInstance,
        previous: State,
        classification: State,
        now: DateTime<Utc>,
    ) {
        match classification {
            State::Normal => {
                instance.state = State::Normal;
                if previous != State::Normal {
                    // Exit is immediate; expose the resolution time.
                    instance.ends_at = Some(now);
                } else {
                    instance.starts_at = None;
                    instance.ends_at = None;
                }
            }
            State::Alerting => {
                let next = self.alerting_or_pending(rule, instance, previous, now);
                self.enter_state(instance, previous, next, now);
            }
            // NoData and Error (when kept as-is by policy) skip hysteresis.
            State::NoData => self.enter_state(instance, previous, State::NoData, now),
            State::Error => self.enter_state(instance, previous, State::Error, now),
            State::Pending => {
                // Only produced by KeepLast redirecting to a previous
                // Pending; hold the state and refresh the heartbeat.
                instance.state = State::Pending;
                instance.ends_at = Some(now + self.heartbeat_ttl());
            }
        }
    }

    /// Decide between Pending and Alerting based on the rule's `for`
    /// duration and how long this instance has been away from Normal.
    fn alerting_or_pending(
        &self,
        rule: &AlertRule,
        instance: &AlertInstance,
        previous: State,
        now: DateTime<Utc>,
    ) -> State {
        if rule.for_duration.is_zero() || previous == State::Alerting {
            return State::Alerting;
        }

        if previous == State::Pending {
            let elapsed = instance
                .starts_at
                .map(|t| now.signed_duration_since(t))
                .unwrap_or_else(chrono::TimeDelta::zero);
            let for_duration = chrono::TimeDelta::from_std(rule.for_duration)
                .unwrap_or_else(|_| chrono::TimeDelta::MAX);
            if elapsed > for_duration {
                return State::Alerting;
            }
            return State::Pending;
        }

        State::Pending
    }

    /// Apply a transition into a (possibly unchanged) non-Normal state.
    /// `starts_at` moves only on the tick that causes the transition; the
    /// heartbeat is refreshed on every tick.
    fn enter_state(
        &self,
        instance: &mut AlertInstance,
        previous: State,
        next: State,
        now: DateTime<Utc>,
    ) {
        if previous != next {
            instance.starts_at = Some(now);
        }
        instance.state = next;
        instance.ends_at = Some(now + self.heartbeat_ttl());
    }

    fn heartbeat_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.resend_delay * HEARTBEAT_MULTIPLIER)
            .unwrap_or_else(|_| chrono::TimeDelta::MAX)
    }

    /// Expand annotation and message templates once per tick. A failed
    /// expansion is recorded on the instance, not propagated.
    fn expand_annotations(&self, rule: &AlertRule, instance: &mut AlertInstance, result: &EvalResult) {
        instance.annotations.clear();
        for (key, text) in &rule.annotations {
            match template::expand(text, &instance.labels, &result.values, &result.eval_string) {
                Ok(expanded) => {
                    instance.annotations.insert(key.clone(), expanded);
                }
                Err(e) => {
                    tracing::warn!(
                        rule_uid = %rule.uid,
                        annotation = %key,
                        error = %e,
                        "annotation template expansion failed"
                    );
                    instance.last_error = Some(e.to_string());
                    instance.annotations.insert(key.clone(), text.clone());
                }
            }
        }
    }

    /// Remove cached instances whose fingerprint did not appear in this
    /// tick, and delete their persisted counterparts. Prevents unbounded
    /// growth when a rule's label cardinality shrinks.
    fn evict_stale(&self, rule: &AlertRule, seen: &HashSet<String>) {
        for fingerprint in self.cache.fingerprints(&rule.uid) {
            if seen.contains(&fingerprint) {
                continue;
            }
            tracing::debug!(
                rule_uid = %rule.uid,
                fingerprint = %fingerprint,
                "evicting stale alert instance"
            );
            self.cache.remove(&rule.uid, &fingerprint);
            if let Err(e) = self.bus.delete_alert_instance(rule.org_id, &rule.uid, &fingerprint) {
                tracing::error!(
                    rule_uid = %rule.uid,
                    fingerprint = %fingerprint,
                    error = %e,
                    "failed to delete stale alert instance"
                );
            }
        }
    }
}
