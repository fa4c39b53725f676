//! Common types used across the Parley engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A formal symbol: an opaque handle used as a key inside anchors and entries.
///
/// Symbols are only unique within one anchor or entry record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The symbol's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifier of an entity in persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// Persistent kind of the entity (e.g., "order", "sku").
    pub kind: String,

    /// Opaque identifier within that kind.
    pub id: String,
}

impl EntityId {
    /// Create a new entity identifier.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// How a formal symbol gets bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymbolRole {
    /// Must be bound before any action using it may run.
    #[default]
    Required,
    /// Bound as a byproduct of another symbol's resolution.
    Correlated,
    /// Bound by iterating a known finite set.
    Enumerated,
}

/// Declaration of one formal symbol in a descriptor or intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Role or purpose of this formal symbol.
    pub description: String,

    /// How the symbol gets bound.
    #[serde(default)]
    pub role: SymbolRole,

    /// Expected persistent kind of the bound identifier, if constrained.
    #[serde(default)]
    pub kind: Option<String>,
}

impl SymbolSpec {
    /// A required symbol with no kind constraint.
    pub fn required(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            role: SymbolRole::Required,
            kind: None,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: SymbolRole) -> Self {
        self.role = role;
        self
    }

    /// Constrain the persistent kind of the bound identifier.
    pub fn of_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Returns true if `id` is acceptable for this symbol.
    pub fn admits(&self, id: &EntityId) -> bool {
        self.kind.as_deref().map_or(true, |kind| kind == id.kind)
    }
}

/// The value shape of a property or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Scalar,
    Set,
    Sequence,
    Relation,
}

impl ValueKind {
    /// Returns true if `action` is structurally legal for this kind.
    pub fn admits(&self, action: ActionCode) -> bool {
        use ActionCode::*;
        match self {
            ValueKind::Scalar => matches!(action, Clear | Assign),
            ValueKind::Set | ValueKind::Relation => {
                matches!(action, Clear | Assign | Insert | Remove)
            }
            ValueKind::Sequence => matches!(action, Clear | Assign | Remove | Append | Prepend),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Set => "set",
            ValueKind::Sequence => "sequence",
            ValueKind::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// Action code carried by a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCode {
    Clear,
    Assign,
    Insert,
    Remove,
    Append,
    Prepend,
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionCode::Clear => "clear",
            ActionCode::Assign => "assign",
            ActionCode::Insert => "insert",
            ActionCode::Remove => "remove",
            ActionCode::Append => "append",
            ActionCode::Prepend => "prepend",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_admits_actions() {
        assert!(ValueKind::Scalar.admits(ActionCode::Assign));
        assert!(!ValueKind::Scalar.admits(ActionCode::Remove));
        assert!(!ValueKind::Set.admits(ActionCode::Append));
        assert!(ValueKind::Relation.admits(ActionCode::Insert));
        assert!(ValueKind::Sequence.admits(ActionCode::Prepend));
        assert!(!ValueKind::Sequence.admits(ActionCode::Insert));
    }

    #[test]
    fn test_symbol_spec_kind_constraint() {
        let spec = SymbolSpec::required("the order").of_kind("order");
        assert!(spec.admits(&EntityId::new("order", "42")));
        assert!(!spec.admits(&EntityId::new("sku", "42")));

        let open = SymbolSpec::required("anything");
        assert!(open.admits(&EntityId::new("sku", "1")));
    }
}
