//! Error types for the Parley engine.

use thiserror::Error;

use crate::entity::EntityKey;
use crate::types::{ActionCode, Symbol, ValueKind};

/// A descriptor, intent or catalog was authored inconsistently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    /// Descriptor names must be non-empty.
    #[error("Descriptor name cannot be empty")]
    EmptyName,

    /// Relation entry symbols must be disjoint from anchor symbols.
    #[error("Relation '{relation}' entry symbol '{symbol}' collides with an anchor symbol")]
    EntryCollidesWithAnchor { relation: String, symbol: Symbol },

    /// A relation must declare at least one entry symbol.
    #[error("Relation '{relation}' declares no entry symbols")]
    EmptyEntry { relation: String },

    /// An intent must offer at least one action.
    #[error("Intent '{intent}' declares no actions")]
    NoActions { intent: String },

    /// Action names must be unique within an intent.
    #[error("Intent '{intent}' declares action '{action}' more than once")]
    DuplicateAction { intent: String, action: String },

    /// A name was registered twice.
    #[error("Descriptor '{name}' is already registered")]
    DuplicateDescriptor { name: String },

    /// The process-wide registry was installed twice.
    #[error("The global descriptor registry is already installed")]
    RegistryAlreadyInstalled,
}

/// Binding a descriptor to an anchor (or a relation entry) failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    /// A symbol the descriptor requires is absent from the anchor.
    #[error("Descriptor '{descriptor}' requires anchor symbol '{symbol}'")]
    MissingAnchorSymbol { descriptor: String, symbol: Symbol },

    /// A supplied identifier has the wrong persistent kind.
    #[error("Symbol '{symbol}' of '{descriptor}' expects a '{expected}' but was bound to a '{found}'")]
    AnchorTypeMismatch {
        descriptor: String,
        symbol: Symbol,
        expected: String,
        found: String,
    },

    /// A relation entry lacks one of the declared entry symbols.
    #[error("Entry of relation '{relation}' is missing symbol '{symbol}'")]
    MissingEntrySymbol { relation: String, symbol: Symbol },

    /// A relation entry carries a symbol the relation does not declare.
    #[error("Entry of relation '{relation}' carries undeclared symbol '{symbol}'")]
    UnknownEntrySymbol { relation: String, symbol: Symbol },
}

/// A fact stream is malformed with respect to its dictionaries or anchor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The fact names an entity absent from both stream dictionaries.
    #[error("Fact {index} targets '{entity}', which is not in the stream dictionaries")]
    UnknownEntityInStream { index: usize, entity: EntityKey },

    /// The fact's entity anchor is not a sub-binding of the stream anchor.
    #[error("Fact {index} targets '{entity}', whose anchor drifts from the stream anchor at '{symbol}'")]
    AnchorDrift {
        index: usize,
        entity: EntityKey,
        symbol: Symbol,
    },

    /// The action is not legal for the entity's value kind.
    #[error("Fact {index} applies '{action}' to {kind} entity '{entity}'")]
    IllegalActionForKind {
        index: usize,
        entity: EntityKey,
        action: ActionCode,
        kind: ValueKind,
    },

    /// A dictionary descriptor does not resolve in the registry.
    #[error("Descriptor '{name}' is not registered")]
    UnregisteredDescriptor { name: String },

    /// A descriptor name is used as both a property and a relation.
    #[error("Descriptor '{name}' appears in both the property and relation dictionaries")]
    DescriptorRoleConflict { name: String },

    /// A property value lies outside the descriptor's element domain.
    #[error("Fact {index} supplies a value outside the element domain of '{entity}'")]
    ValueOutsideDomain { index: usize, entity: EntityKey },

    /// A relation entry does not match the relation's entry shape.
    #[error("Fact {index} supplies a malformed entry for '{entity}': {source}")]
    MalformedEntry {
        index: usize,
        entity: EntityKey,
        source: BindError,
    },
}

/// Reducing an entity's facts to a net effect failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// A fact's mutation does not belong to the entity's value kind.
    #[error("'{action}' cannot be merged into {kind} entity '{entity}'")]
    ConflictingActionForKind {
        entity: EntityKey,
        action: ActionCode,
        kind: ValueKind,
    },

    /// A pivot could not be found in a sequence value known to the merge.
    #[error("Pivot {pivot} not found while merging '{entity}'")]
    UnresolvedPivot { entity: EntityKey, pivot: String },

    /// There was nothing to merge.
    #[error("No facts to merge for '{entity}'")]
    NoFacts { entity: EntityKey },
}

/// A condition could not be evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The hard predicate's underlying check failed.
    #[error("Hard predicate failed: {message}")]
    PredicateFailed { message: String },

    /// The hard predicate did not resolve in time.
    #[error("Hard predicate timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Opaque failure reported by the persistent store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached or is temporarily unable to serve.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The stored value has a different shape than the net effect expects.
    #[error("Stored value of '{entity}' does not match the effect shape")]
    ShapeMismatch { entity: EntityKey },

    /// A splice pivot is absent from the stored sequence.
    #[error("Pivot {pivot} not found in stored sequence of '{entity}'")]
    PivotNotFound { entity: EntityKey, pivot: String },

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Umbrella error for Parley operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParleyError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ParleyError {
    /// Returns true if this error may clear up on retry.
    ///
    /// Structural errors (descriptor, bind, validation, merge) never do.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ParleyError::Evaluation(_) => true,
            ParleyError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience Result type for Parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let transient = ParleyError::from(StoreError::Unavailable("down".to_string()));
        assert!(transient.is_recoverable());

        let evaluation = ParleyError::from(EvaluationError::Timeout { duration_ms: 10 });
        assert!(evaluation.is_recoverable());

        let structural = ParleyError::from(DescriptorError::EmptyName);
        assert!(!structural.is_recoverable());

        let backend = ParleyError::from(StoreError::Backend("disk".to_string()));
        assert!(!backend.is_recoverable());
    }
}
