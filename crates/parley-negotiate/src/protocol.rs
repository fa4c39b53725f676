//! Messages exchanged with the upstream negotiator.

use parley_core::{Anchor, Symbol};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::report::Outcome;
use crate::state::IntentState;

/// Signals sent from a session to the negotiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiatorSignal {
    /// Guidance to display while the anchor is incomplete.
    Hints {
        session_id: Uuid,
        intent: String,
        hints: Vec<String>,
        unbound: Vec<UnboundSymbol>,
    },

    /// A reminder condition fired.
    Reminder {
        session_id: Uuid,
        cycle: u32,
        hints: Vec<String>,
        unbound: Vec<UnboundSymbol>,
    },

    StateChanged {
        session_id: Uuid,
        from: IntentState,
        to: IntentState,
    },

    /// The session reached a terminal state.
    Outcome { session_id: Uuid, outcome: Outcome },
}

/// A required symbol the negotiator still has to bind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnboundSymbol {
    pub symbol: Symbol,
    pub description: String,
}

/// Updates sent from the negotiator to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiatorUpdate {
    /// New symbol bindings for the intent anchor.
    Bind { bindings: Anchor },

    /// The conversation moved on.
    Abandon { reason: String },
}
