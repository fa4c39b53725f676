//! Intent lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an intent execution.
///
/// `Disabled -> Enabled -> Negotiating -> Executing -> {Succeeded, Failed, Abandoned}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    /// Enable conditions do not hold yet.
    Disabled,
    /// Enabled, anchor not yet inspected.
    Enabled,
    /// Waiting for the negotiator to bind required symbols.
    Negotiating,
    /// Selecting and running an action.
    Executing,
    Succeeded,
    Failed,
    Abandoned,
}

impl IntentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentState::Succeeded | IntentState::Failed | IntentState::Abandoned
        )
    }

    /// Whether the negotiator may still bind symbols or abandon.
    pub fn accepts_updates(&self) -> bool {
        matches!(
            self,
            IntentState::Disabled | IntentState::Enabled | IntentState::Negotiating
        )
    }

    /// Whether reminder conditions are evaluated in this state.
    pub fn fires_reminders(&self) -> bool {
        matches!(self, IntentState::Enabled | IntentState::Negotiating)
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentState::Disabled => "disabled",
            IntentState::Enabled => "enabled",
            IntentState::Negotiating => "negotiating",
            IntentState::Executing => "executing",
            IntentState::Succeeded => "succeeded",
            IntentState::Failed => "failed",
            IntentState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}
