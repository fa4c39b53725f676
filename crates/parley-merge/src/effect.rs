//! Net effects: the single reduced mutation applied to one entity.

use parley_core::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::splice::SpliceOp;

/// The net effect of all facts on one entity.
///
/// Scalar, set and relation entities reduce to `Clear`, `Assign` or `Delta`;
/// sequences reduce to `Clear`, `Assign` or `Splice`. Never a mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetEffect {
    Clear,
    Assign(Assignment),
    Delta(Delta),
    Splice(Vec<SpliceOp>),
}

/// Wholesale replacement value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    Scalar(Value),
    Set(Vec<Value>),
    Sequence(Vec<Value>),
    /// Remove all entries, then insert these.
    Relation(Vec<Entry>),
}

/// Incremental change to a set or relation whose stored value is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    Set(Changes<Value>),
    Relation(Changes<Entry>),
}

/// Pending insertions and removals. An element is never in both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changes<T> {
    pub inserted: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> Changes<T> {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Shape of a net effect, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectShape {
    Clear,
    Assign,
    Delta,
    Splice,
}

impl NetEffect {
    pub fn shape(&self) -> EffectShape {
        match self {
            NetEffect::Clear => EffectShape::Clear,
            NetEffect::Assign(_) => EffectShape::Assign,
            NetEffect::Delta(_) => EffectShape::Delta,
            NetEffect::Splice(_) => EffectShape::Splice,
        }
    }
}
