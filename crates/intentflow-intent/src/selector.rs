//! Workflow selector: maps an [`Intent`] to a workflow id.
//!
//! Selection is a pure function of the intent, the user context and the
//! route table.  It governs auto-execution eligibility only; the engine
//! applies the workflow's own approval gate independently.

use std::collections::HashMap;

use intentflow_core::{Intent, IntentType, UserContext};

/// Why no workflow was selected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionDenied {
    /// The route table has no entry for this intent type.
    #[error("no workflow routed for intent type `{intent_type}`")]
    NoRoute { intent_type: IntentType },

    /// The user lacks the permission gating this intent type.
    #[error("permission `{permission}` not granted")]
    PermissionDenied { permission: &'static str },

    /// The intent wants approval and the user has not opted into
    /// auto-approval for its category.
    #[error("auto-execution of `{intent_type}` intents requires approval the user has not pre-granted")]
    AutoExecuteDisallowed { intent_type: IntentType },
}

/// Route table from intent type to workflow id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSelector {
    routes: HashMap<IntentType, String>,
}

impl Default for WorkflowSelector {
    fn default() -> Self {
        let routes = [
            (IntentType::Appointment, "schedule-appointment"),
            (IntentType::Prescription, "manage-prescription"),
            (IntentType::Claim, "process-insurance-claim"),
            (IntentType::Payment, "process-payment"),
            (IntentType::Notification, "send-notification"),
            (IntentType::General, "general-assistance"),
        ]
        .into_iter()
        .map(|(t, id)| (t, id.to_string()))
        .collect();
        Self { routes }
    }
}

impl WorkflowSelector {
    /// A selector with the standard route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A selector with no routes at all.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Route `intent_type` to `workflow_id`, replacing any existing entry.
    pub fn with_route(mut self, intent_type: IntentType, workflow_id: impl Into<String>) -> Self {
        self.routes.insert(intent_type, workflow_id.into());
        self
    }

    pub fn without_route(mut self, intent_type: IntentType) -> Self {
        self.routes.remove(&intent_type);
        self
    }

    pub fn route(&self, intent_type: IntentType) -> Option<&str> {
        self.routes.get(&intent_type).map(String::as_str)
    }

    /// The selected workflow id, or `None`.
    pub fn select(&self, intent: &Intent, context: &UserContext) -> Option<String> {
        self.evaluate(intent, context).ok().map(str::to_string)
    }

    /// Like [`select`](Self::select) but reports the denial reason.
    pub fn evaluate(
        &self,
        intent: &Intent,
        context: &UserContext,
    ) -> Result<&str, SelectionDenied> {
        let intent_type = intent.intent_type;
        let workflow_id = self
            .route(intent_type)
            .ok_or(SelectionDenied::NoRoute { intent_type })?;

        if let Some((permission, false)) = context.permissions.gate(intent_type) {
            return Err(SelectionDenied::PermissionDenied { permission });
        }

        if intent.requires_approval && !context.preferences.auto_approve.allows(intent_type) {
            return Err(SelectionDenied::AutoExecuteDisallowed { intent_type });
        }

        Ok(workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{AutoApprove, Permissions};

    fn intent(intent_type: IntentType, requires_approval: bool) -> Intent {
        let mut intent = Intent::fallback();
        intent.intent_type = intent_type;
        intent.requires_approval = requires_approval;
        intent
    }

    fn permissive() -> UserContext {
        UserContext::new("u1").with_permissions(Permissions::all())
    }

    #[test]
    fn default_table_routes_every_type() {
        let selector = WorkflowSelector::new();
        for t in IntentType::ALL {
            assert!(selector.route(t).is_some(), "{t} has no route");
        }
        assert_eq!(
            selector.select(&intent(IntentType::Claim, false), &permissive()),
            Some("process-insurance-claim".into())
        );
    }

    #[test]
    fn missing_permission_denies() {
        let ctx = UserContext::new("u1");
        assert_eq!(
            WorkflowSelector::new().evaluate(&intent(IntentType::Payment, false), &ctx),
            Err(SelectionDenied::PermissionDenied {
                permission: "canAccessFinancialData"
            })
        );
        // Ungated categories pass without permissions.
        assert_eq!(
            WorkflowSelector::new().evaluate(&intent(IntentType::Notification, false), &ctx),
            Ok("send-notification")
        );
    }

    #[test]
    fn approval_needed_without_auto_approve_denies() {
        let selector = WorkflowSelector::new();
        let wants_approval = intent(IntentType::Appointment, true);

        assert_eq!(
            selector.evaluate(&wants_approval, &permissive()),
            Err(SelectionDenied::AutoExecuteDisallowed {
                intent_type: IntentType::Appointment
            })
        );

        let ctx = permissive().with_auto_approve(AutoApprove {
            appointments: true,
            ..AutoApprove::default()
        });
        assert_eq!(selector.evaluate(&wants_approval, &ctx), Ok("schedule-appointment"));
    }

    #[test]
    fn overrides_and_removals_apply() {
        let selector = WorkflowSelector::new()
            .with_route(IntentType::General, "triage")
            .without_route(IntentType::Claim);
        assert_eq!(selector.route(IntentType::General), Some("triage"));
        assert_eq!(
            selector.evaluate(&intent(IntentType::Claim, false), &permissive()),
            Err(SelectionDenied::NoRoute {
                intent_type: IntentType::Claim
            })
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let selector = WorkflowSelector::new();
        let i = intent(IntentType::Prescription, false);
        let ctx = permissive();
        let first = selector.select(&i, &ctx);
        for _ in 0..10 {
            assert_eq!(selector.select(&i, &ctx), first);
        }
    }
}
