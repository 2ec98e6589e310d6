//! Agent lifecycle states and the transitions administrative actions drive.
//!
//! ```text
//!  first contact
//!        │
//!        ▼
//!  WaitingForAdmission ──admit──▶ Enabled ◀──enable── Disabled
//!                                    │                   ▲
//!                                    └──────disable──────┘
//! ```
//!
//! Uninstalling is record deletion, not a status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FleetError;

/// Status column of an agent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    WaitingForAdmission,
    Enabled,
    Disabled,
}

impl AgentStatus {
    /// Status given to an agent seen for the first time.
    pub const fn initial() -> Self {
        Self::WaitingForAdmission
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForAdmission => "WaitingForAdmission",
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
        }
    }

    /// Status after applying `action`, or `None` if the action is not
    /// allowed from here.
    ///
    /// Enable and disable accept their own target state so a command can be
    /// re-sent to an agent that never applied it.
    pub fn apply(self, action: LifecycleAction) -> Option<Self> {
        match (self, action) {
            (Self::WaitingForAdmission, LifecycleAction::Admit) => Some(Self::Enabled),
            (Self::Enabled | Self::Disabled, LifecycleAction::Enable) => Some(Self::Enabled),
            (Self::Enabled | Self::Disabled, LifecycleAction::Disable) => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative actions that move an agent between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Admit,
    Enable,
    Disable,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admit => "admit",
            Self::Enable => "enable",
            Self::Disable => "disable",
        })
    }
}

/// A validated status change for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AgentStatus,
    pub to: AgentStatus,
    pub action: LifecycleAction,
}

impl Transition {
    /// Validate `action` against the agent's current status.
    pub fn plan(
        agent_id: &str,
        from: AgentStatus,
        action: LifecycleAction,
    ) -> Result<Self, FleetError> {
        from.apply(action)
            .map(|to| Self { from, to, action })
            .ok_or_else(|| FleetError::InvalidTransition {
                agent_id: agent_id.to_string(),
                from,
                action,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_initial_status() {
        assert_eq!(AgentStatus::initial(), AgentStatus::WaitingForAdmission);
    }

    #[test]
    fn test_admit_only_from_waiting() {
        assert_eq!(
            AgentStatus::WaitingForAdmission.apply(LifecycleAction::Admit),
            Some(AgentStatus::Enabled)
        );
        assert_eq!(AgentStatus::Enabled.apply(LifecycleAction::Admit), None);
        assert_eq!(AgentStatus::Disabled.apply(LifecycleAction::Admit), None);
    }

    #[test]
    fn test_enable_disable_need_admission() {
        assert_eq!(AgentStatus::WaitingForAdmission.apply(LifecycleAction::Enable), None);
        assert_eq!(AgentStatus::WaitingForAdmission.apply(LifecycleAction::Disable), None);

        assert_eq!(
            AgentStatus::Enabled.apply(LifecycleAction::Disable),
            Some(AgentStatus::Disabled)
        );
        assert_eq!(
            AgentStatus::Disabled.apply(LifecycleAction::Enable),
            Some(AgentStatus::Enabled)
        );
        assert_eq!(
            AgentStatus::Enabled.apply(LifecycleAction::Enable),
            Some(AgentStatus::Enabled)
        );
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = Transition::plan("a1", AgentStatus::Enabled, LifecycleAction::Admit).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(err.to_string(), "Cannot admit agent a1 while Enabled");
    }

    #[test]
    fn test_status_serializes_as_column_value() {
        let json = serde_json::to_string(&AgentStatus::WaitingForAdmission).unwrap();
        assert_eq!(json, "\"WaitingForAdmission\"");
    }
}
