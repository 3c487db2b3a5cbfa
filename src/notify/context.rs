//! Notification context
//!
//! A `NotifyContext` is a read-only view over one evaluation tick's
//! outcome: the rule, the state transition and the optional rendered
//! image. It borrows the rule and transition and never outlives the tick.

use crate::bus::{DashboardRef, DispatchBus};
use crate::model::{AlertRule, State};
use crate::state::StateTransition;

/// Visual description of a state, used by rich channels.
pub struct StateDescription {
    pub color: &'static str,
    pub text: &'static str,
}

pub fn state_description(state: State) -> StateDescription {
    match state {
        State::Normal => StateDescription {
            color: "#36a64f",
            text: "OK",
        },
        State::Pending => StateDescription {
            color: "#888888",
            text: "Pending",
        },
        State::Alerting => StateDescription {
            color: "#D63232",
            text: "Alerting",
        },
        State::NoData => StateDescription {
            color: "#888888",
            text: "No Data",
        },
        State::Error => StateDescription {
            color: "#D63232",
            text: "Error",
        },
    }
}

/// Read-only view of one tick's outcome, handed to every channel.
pub struct NotifyContext<'a> {
    pub rule: &'a AlertRule,
    pub transition: &'a StateTransition,
    /// Test runs bypass the versioned dispatch state entirely.
    pub is_test_run: bool,
    /// Public URL of the rendered panel image, when available.
    pub image_url: Option<String>,
    /// Local path of the rendered image, for channels that embed files.
    pub image_path: Option<std::path::PathBuf>,
    /// Link back to the dashboard panel owning the rule, when resolvable.
    pub rule_url: Option<String>,
}

impl<'a> NotifyContext<'a> {
    pub fn new(rule: &'a AlertRule, transition: &'a StateTransition) -> Self {
        Self {
            rule,
            transition,
            is_test_run: false,
            image_url: None,
            image_path: None,
            rule_url: None,
        }
    }

    pub fn state(&self) -> State {
        self.transition.instance.state
    }

    /// Identifies the alert instance for the notifier-state records.
    pub fn instance_id(&self) -> &str {
        &self.transition.instance.fingerprint
    }

    /// Notification title including the state, e.g. `[Alerting] High CPU`.
    pub fn title(&self) -> String {
        format!("[{}] {}", state_description(self.state()).text, self.rule.title)
    }

    /// Expanded rule message, falling back to the raw message text.
    pub fn message(&self) -> &str {
        &self.rule.message
    }

    /// Resolve the link back to the dashboard panel that owns the rule
    /// through the bus. Failure to resolve degrades to no link.
    pub fn lookup_rule_url(&self, bus: &dyn DispatchBus) -> Option<String> {
        let DashboardRef { uid, slug } = bus
            .get_dashboard_ref(self.rule.org_id, self.rule.dashboard_id)
            .ok()?;
        Some(format!(
            "/d/{}/{}?tab=alert&viewPanel={}&orgId={}",
            uid, slug, self.rule.panel_id, self.rule.org_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertInstance, LabelSet};

    #[test]
    fn test_title_includes_state() {
        let rule = AlertRule::new(1, "r", "High CPU");
        let mut instance = AlertInstance::new(1, "r", LabelSet::new());
        instance.state = State::Alerting;
        let transition = StateTransition {
            previous_state: State::Normal,
            instance,
        };
        let ctx = NotifyContext::new(&rule, &transition);
        assert_eq!(ctx.title(), "[Alerting] High CPU");
    }
}
