//! Session-level errors.

use parley_core::{EvaluationError, ParleyError, Symbol, ValidationError};
use thiserror::Error;

use crate::state::IntentState;

/// Error raised while driving an intent session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Parley(#[from] ParleyError),

    /// The anchor is complete but no action's conditions hold.
    #[error("No eligible action for intent '{intent}'")]
    NoEligibleAction { intent: String },

    /// The selected action's transform failed or timed out.
    #[error("Action '{action}' failed: {message}")]
    TransformFailed { action: String, message: String },

    /// Some entities' net effects were not applied.
    #[error("Commit incomplete: {applied} applied, {failed} failed: {reason}")]
    PartialCommit {
        applied: usize,
        failed: usize,
        reason: String,
    },

    /// The operation is not allowed in the current state.
    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        state: IntentState,
        operation: &'static str,
    },

    /// The negotiator bound a symbol the intent does not declare.
    #[error("Intent '{intent}' declares no symbol '{symbol}'")]
    UnknownSymbol { intent: String, symbol: Symbol },

    #[error("Intent abandoned: {reason}")]
    Abandoned { reason: String },
}

impl SessionError {
    /// Returns true if re-running the intent may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Parley(e) => e.is_recoverable(),
            SessionError::PartialCommit { .. } => true,
            _ => false,
        }
    }
}

impl From<EvaluationError> for SessionError {
    fn from(error: EvaluationError) -> Self {
        SessionError::Parley(error.into())
    }
}

impl From<ValidationError> for SessionError {
    fn from(error: ValidationError) -> Self {
        SessionError::Parley(error.into())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
