//! Anchors, anchor schemas and relation entries.
//!
//! An [`Anchor`] maps formal symbols to persistent-entity identifiers. An
//! [`AnchorSchema`] is the runtime symbol-role table a descriptor or intent
//! declares; anchors are validated against it rather than by structure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Symbol, SymbolRole, SymbolSpec};

/// Mapping of formal symbols to persistent-entity identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Anchor(BTreeMap<Symbol, EntityId>);

impl Anchor {
    /// Create an empty anchor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a symbol, returning the anchor.
    pub fn with(mut self, symbol: impl Into<Symbol>, id: EntityId) -> Self {
        self.bind(symbol, id);
        self
    }

    /// Bind a symbol, returning the previous binding if any.
    pub fn bind(&mut self, symbol: impl Into<Symbol>, id: EntityId) -> Option<EntityId> {
        self.0.insert(symbol.into(), id)
    }

    /// Look up a symbol.
    pub fn get(&self, symbol: &Symbol) -> Option<&EntityId> {
        self.0.get(symbol)
    }

    /// Returns true if the symbol is bound.
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.0.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &EntityId)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first symbol of `self` that is absent from, or bound
    /// differently in, `other`. `None` means `self` is a sub-binding of `other`.
    pub fn drift_from(&self, other: &Anchor) -> Option<&Symbol> {
        self.0
            .iter()
            .find(|(symbol, id)| other.get(symbol) != Some(*id))
            .map(|(symbol, _)| symbol)
    }

    /// Returns true if every binding in `self` also appears in `other`.
    pub fn is_sub_binding_of(&self, other: &Anchor) -> bool {
        self.drift_from(other).is_none()
    }

    /// Restrict the anchor to the given symbols.
    pub fn project<'a>(&self, symbols: impl IntoIterator<Item = &'a Symbol>) -> Anchor {
        Anchor(
            symbols
                .into_iter()
                .filter_map(|s| self.0.get(s).map(|id| (s.clone(), id.clone())))
                .collect(),
        )
    }

    /// Merge another anchor's bindings into this one (later bindings win).
    pub fn extend(&mut self, other: Anchor) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (symbol, id)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", symbol, id)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<(Symbol, EntityId)> for Anchor {
    fn from_iter<I: IntoIterator<Item = (Symbol, EntityId)>>(iter: I) -> Self {
        Anchor(iter.into_iter().collect())
    }
}

/// Declared symbol table of a descriptor or intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorSchema(BTreeMap<Symbol, SymbolSpec>);

impl AnchorSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a symbol, returning the schema.
    pub fn symbol(mut self, symbol: impl Into<Symbol>, spec: SymbolSpec) -> Self {
        self.0.insert(symbol.into(), spec);
        self
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolSpec> {
        self.0.get(symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.0.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &SymbolSpec)> {
        self.0.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.0.keys()
    }

    /// Symbols declared with the [`SymbolRole::Required`] role.
    pub fn required(&self) -> impl Iterator<Item = &Symbol> {
        self.0
            .iter()
            .filter(|(_, spec)| spec.role == SymbolRole::Required)
            .map(|(symbol, _)| symbol)
    }

    /// Required symbols not yet bound in `anchor`.
    pub fn unbound_required<'a>(&'a self, anchor: &'a Anchor) -> Vec<&'a Symbol> {
        self.required().filter(|s| !anchor.contains(s)).collect()
    }

    /// Returns true if every required symbol is bound in `anchor`.
    pub fn is_complete(&self, anchor: &Anchor) -> bool {
        self.required().all(|s| anchor.contains(s))
    }
}

/// One entry of a relation: a symbol-to-identifier record disjoint from the anchor.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry(BTreeMap<Symbol, EntityId>);

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: impl Into<Symbol>, id: EntityId) -> Self {
        self.0.insert(symbol.into(), id);
        self
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&EntityId> {
        self.0.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &EntityId)> {
        self.0.iter()
    }
}
