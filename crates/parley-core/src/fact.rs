//! Facts: mutation instructions against bound entities.
//!
//! A fact's [`Mutation`] is a tagged variant with exactly one kind-specific
//! operation, so a fact can never carry payloads for two kinds at once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::anchor::Entry;
use crate::entity::EntityKey;
use crate::types::{ActionCode, ValueKind};

/// Operation on a scalar-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarOp {
    Clear,
    Assign(Value),
}

/// Operation on a set-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOp {
    Clear,
    Assign(Vec<Value>),
    Insert(Vec<Value>),
    Remove(Vec<Value>),
}

/// Operation on a sequence-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOp {
    Clear,
    Assign(Vec<Value>),
    Remove(Vec<Value>),
    /// Splice `values` after the first occurrence of `after`, or at the end.
    Append {
        after: Option<Value>,
        values: Vec<Value>,
    },
    /// Splice `values` before the first occurrence of `before`, or at the start.
    Prepend {
        before: Option<Value>,
        values: Vec<Value>,
    },
}

/// Operation on a relation. `Assign` removes all entries, then inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationOp {
    Clear,
    Assign(Vec<Entry>),
    Insert(Vec<Entry>),
    Remove(Vec<Entry>),
}

/// Kind-tagged mutation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    Scalar(ScalarOp),
    Set(SetOp),
    Sequence(SequenceOp),
    Relation(RelationOp),
}

impl Mutation {
    /// The value kind this mutation is written for.
    pub fn kind(&self) -> ValueKind {
        match self {
            Mutation::Scalar(_) => ValueKind::Scalar,
            Mutation::Set(_) => ValueKind::Set,
            Mutation::Sequence(_) => ValueKind::Sequence,
            Mutation::Relation(_) => ValueKind::Relation,
        }
    }

    /// The action code of this mutation.
    pub fn code(&self) -> ActionCode {
        match self {
            Mutation::Scalar(ScalarOp::Clear)
            | Mutation::Set(SetOp::Clear)
            | Mutation::Sequence(SequenceOp::Clear)
            | Mutation::Relation(RelationOp::Clear) => ActionCode::Clear,
            Mutation::Scalar(ScalarOp::Assign(_))
            | Mutation::Set(SetOp::Assign(_))
            | Mutation::Sequence(SequenceOp::Assign(_))
            | Mutation::Relation(RelationOp::Assign(_)) => ActionCode::Assign,
            Mutation::Set(SetOp::Insert(_)) | Mutation::Relation(RelationOp::Insert(_)) => {
                ActionCode::Insert
            }
            Mutation::Set(SetOp::Remove(_))
            | Mutation::Sequence(SequenceOp::Remove(_))
            | Mutation::Relation(RelationOp::Remove(_)) => ActionCode::Remove,
            Mutation::Sequence(SequenceOp::Append { .. }) => ActionCode::Append,
            Mutation::Sequence(SequenceOp::Prepend { .. }) => ActionCode::Prepend,
        }
    }

    /// Property element values carried by this mutation, pivots included.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Mutation::Scalar(ScalarOp::Assign(v)) => vec![v],
            Mutation::Set(SetOp::Assign(vs) | SetOp::Insert(vs) | SetOp::Remove(vs))
            | Mutation::Sequence(SequenceOp::Assign(vs) | SequenceOp::Remove(vs)) => {
                vs.iter().collect()
            }
            Mutation::Sequence(SequenceOp::Append { after: pivot, values })
            | Mutation::Sequence(SequenceOp::Prepend {
                before: pivot,
                values,
            }) => pivot.iter().chain(values.iter()).collect(),
            _ => Vec::new(),
        }
    }

    /// Relation entries carried by this mutation.
    pub fn entries(&self) -> &[Entry] {
        match self {
            Mutation::Relation(
                RelationOp::Assign(es) | RelationOp::Insert(es) | RelationOp::Remove(es),
            ) => es,
            _ => &[],
        }
    }
}

/// An instruction to mutate one bound entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Entity targeted by the fact.
    pub entity: EntityKey,

    pub mutation: Mutation,
}

impl Fact {
    pub fn new(entity: EntityKey, mutation: Mutation) -> Self {
        Self { entity, mutation }
    }
}
