//! Per-user context supplied by the caller on every invocation.
//!
//! The core only ever reads a [`UserContext`]; ownership stays with whoever
//! manages user profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::{IntentType, descend, split_path};

/// Per-category auto-approval flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoApprove {
    pub appointments: bool,
    pub prescriptions: bool,
    pub claims: bool,
    pub payments: bool,
    pub notifications: bool,
    pub general: bool,
}

impl AutoApprove {
    /// Whether intents of this category may run without a human in the loop.
    pub fn allows(&self, intent_type: IntentType) -> bool {
        match intent_type {
            IntentType::Appointment => self.appointments,
            IntentType::Prescription => self.prescriptions,
            IntentType::Claim => self.claims,
            IntentType::Payment => self.payments,
            IntentType::Notification => self.notifications,
            IntentType::General => self.general,
        }
    }
}

/// Local working hours, informational for prompt building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    /// `HH:MM`, 24-hour clock.
    pub start: String,
    /// `HH:MM`, 24-hour clock.
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub auto_approve: AutoApprove,
    pub notification_channels: Vec<String>,
    pub working_hours: Option<WorkingHours>,
}

/// One recent action, newest last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<IntentType>,
    pub timestamp: DateTime<Utc>,
}

/// Action-category permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permissions {
    pub can_schedule_appointments: bool,
    pub can_manage_prescriptions: bool,
    pub can_file_claims: bool,
    pub can_access_financial_data: bool,
}

impl Permissions {
    /// Everything granted.
    pub fn all() -> Self {
        Self {
            can_schedule_appointments: true,
            can_manage_prescriptions: true,
            can_file_claims: true,
            can_access_financial_data: true,
        }
    }

    /// The permission gating an intent category, as `(name, granted)`.
    /// Categories without a dedicated permission return `None` and are
    /// allowed by default.
    pub fn gate(&self, intent_type: IntentType) -> Option<(&'static str, bool)> {
        match intent_type {
            IntentType::Appointment => {
                Some(("canScheduleAppointments", self.can_schedule_appointments))
            }
            IntentType::Prescription => {
                Some(("canManagePrescriptions", self.can_manage_prescriptions))
            }
            IntentType::Claim => Some(("canFileClaims", self.can_file_claims)),
            IntentType::Payment => Some(("canAccessFinancialData", self.can_access_financial_data)),
            IntentType::Notification | IntentType::General => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: AutoApprove) -> Self {
        self.preferences.auto_approve = auto_approve;
        self
    }

    /// Look up a dotted key against the camelCase JSON form of the context,
    /// e.g. `userId` or `preferences.notificationChannels.0`.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let root = serde_json::to_value(self).ok()?;
        let (head, rest) = split_path(key);
        let top = root.get(head)?;
        descend(top, rest).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_gate_covers_four_categories() {
        let perms = Permissions {
            can_schedule_appointments: true,
            ..Permissions::default()
        };
        assert_eq!(
            perms.gate(IntentType::Appointment),
            Some(("canScheduleAppointments", true))
        );
        assert_eq!(perms.gate(IntentType::Payment), Some(("canAccessFinancialData", false)));
        assert_eq!(perms.gate(IntentType::General), None);
        assert_eq!(perms.gate(IntentType::Notification), None);
    }

    #[test]
    fn context_lookup_uses_camel_case_paths() {
        let mut ctx = UserContext::new("user-7");
        ctx.preferences.notification_channels = vec!["sms".into(), "email".into()];

        assert_eq!(ctx.lookup("userId"), Some(Value::String("user-7".into())));
        assert_eq!(
            ctx.lookup("preferences.notificationChannels.1"),
            Some(Value::String("email".into()))
        );
        assert_eq!(ctx.lookup("nope"), None);
    }

    #[test]
    fn missing_sections_deserialize_to_defaults() {
        let ctx: UserContext = serde_json::from_str(r#"{"userId": "u"}"#).unwrap();
        assert!(!ctx.preferences.auto_approve.allows(IntentType::Appointment));
        assert!(!ctx.permissions.can_file_claims);
    }
}
