//! # Parley Negotiate
//!
//! Condition evaluation and the intent executor state machine.
//!
//! An [`IntentSession`] negotiates the anchor of one [`Intent`] with an
//! upstream negotiator, selects the first eligible [`Action`], and commits
//! the merged facts of its transform.

pub mod condition;
pub mod config;
pub mod error;
pub mod intent;
pub mod protocol;
pub mod report;
pub mod session;
pub mod state;

pub use condition::{evaluate, predicate, soft_hints, FnPredicate, Predicate, When};
pub use config::ExecutorConfig;
pub use error::{Result, SessionError};
pub use intent::{
    transform, Action, ActionCategory, Catalog, Feature, FnTransform, Intent, IntentBuilder,
    Transform, TransformError,
};
pub use protocol::{NegotiatorSignal, NegotiatorUpdate, UnboundSymbol};
pub use report::{ExecutionEvent, ExecutionEventType, ExecutionReport, Outcome};
pub use session::{AbandonHandle, IntentSession};
pub use state::IntentState;
