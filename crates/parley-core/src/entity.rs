//! Bound entities: a descriptor attached to one concrete anchor.
//!
//! Binding is pure resolution. Two bound entities address the same slot iff
//! their [`EntityKey`]s (descriptor name plus anchor) are equal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::anchor::{Anchor, AnchorSchema, Entry};
use crate::descriptor::{Descriptor, PropertyDescriptor, RelationDescriptor};
use crate::error::BindError;
use crate::types::ValueKind;

/// Structural identity of a bound entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Name of the descriptor.
    pub descriptor: String,

    /// Bindings for the descriptor's anchor symbols.
    pub anchor: Anchor,
}

impl EntityKey {
    pub fn new(descriptor: impl Into<String>, anchor: Anchor) -> Self {
        Self {
            descriptor: descriptor.into(),
            anchor,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.descriptor, self.anchor)
    }
}

/// A property descriptor bound to an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundProperty {
    pub descriptor: Arc<PropertyDescriptor>,
    pub anchor: Anchor,
}

/// A relation descriptor bound to an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRelation {
    pub descriptor: Arc<RelationDescriptor>,
    pub anchor: Anchor,
}

/// Either kind of bound entity.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundEntity {
    Property(BoundProperty),
    Relation(BoundRelation),
}

impl BoundProperty {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.descriptor.name, self.anchor.clone())
    }
}

impl BoundRelation {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.descriptor.name, self.anchor.clone())
    }
}

impl BoundEntity {
    pub fn key(&self) -> EntityKey {
        match self {
            BoundEntity::Property(p) => p.key(),
            BoundEntity::Relation(r) => r.key(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BoundEntity::Property(p) => &p.descriptor.name,
            BoundEntity::Relation(r) => &r.descriptor.name,
        }
    }

    pub fn anchor(&self) -> &Anchor {
        match self {
            BoundEntity::Property(p) => &p.anchor,
            BoundEntity::Relation(r) => &r.anchor,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            BoundEntity::Property(p) => p.descriptor.kind(),
            BoundEntity::Relation(_) => ValueKind::Relation,
        }
    }
}

impl From<BoundProperty> for BoundEntity {
    fn from(entity: BoundProperty) -> Self {
        BoundEntity::Property(entity)
    }
}

impl From<BoundRelation> for BoundEntity {
    fn from(entity: BoundRelation) -> Self {
        BoundEntity::Relation(entity)
    }
}

/// Resolve the descriptor's anchor schema against `anchor`, keeping only the
/// symbols the descriptor declares.
fn resolve_anchor(
    descriptor: &str,
    schema: &AnchorSchema,
    anchor: &Anchor,
) -> Result<Anchor, BindError> {
    for (symbol, spec) in schema.iter() {
        let id = anchor
            .get(symbol)
            .ok_or_else(|| BindError::MissingAnchorSymbol {
                descriptor: descriptor.to_string(),
                symbol: symbol.clone(),
            })?;

        if !spec.admits(id) {
            return Err(BindError::AnchorTypeMismatch {
                descriptor: descriptor.to_string(),
                symbol: symbol.clone(),
                expected: spec.kind.clone().unwrap_or_default(),
                found: id.kind.clone(),
            });
        }
    }

    Ok(anchor.project(schema.symbols()))
}

/// Bind a property descriptor to an anchor.
pub fn bind_property(
    descriptor: &Arc<PropertyDescriptor>,
    anchor: &Anchor,
) -> Result<BoundProperty, BindError> {
    let anchor = resolve_anchor(&descriptor.name, &descriptor.anchor, anchor)?;
    Ok(BoundProperty {
        descriptor: Arc::clone(descriptor),
        anchor,
    })
}

/// Bind a relation descriptor to an anchor.
pub fn bind_relation(
    descriptor: &Arc<RelationDescriptor>,
    anchor: &Anchor,
) -> Result<BoundRelation, BindError> {
    let anchor = resolve_anchor(&descriptor.name, &descriptor.anchor, anchor)?;
    Ok(BoundRelation {
        descriptor: Arc::clone(descriptor),
        anchor,
    })
}

/// Bind any descriptor to an anchor.
pub fn bind(descriptor: &Descriptor, anchor: &Anchor) -> Result<BoundEntity, BindError> {
    match descriptor {
        Descriptor::Property(p) => bind_property(p, anchor).map(BoundEntity::Property),
        Descriptor::Relation(r) => bind_relation(r, anchor).map(BoundEntity::Relation),
    }
}

/// Check that `entry` supplies exactly the relation's entry symbols, each
/// bound to an identifier of a compatible kind.
pub fn bind_entry(relation: &RelationDescriptor, entry: &Entry) -> Result<(), BindError> {
    if let Some((symbol, _)) = entry.iter().find(|(s, _)| !relation.entry.contains(s)) {
        return Err(BindError::UnknownEntrySymbol {
            relation: relation.name.clone(),
            symbol: symbol.clone(),
        });
    }

    for (symbol, spec) in relation.entry.iter() {
        let id = entry.get(symbol).ok_or_else(|| BindError::MissingEntrySymbol {
            relation: relation.name.clone(),
            symbol: symbol.clone(),
        })?;

        if !spec.admits(id) {
            return Err(BindError::AnchorTypeMismatch {
                descriptor: relation.name.clone(),
                symbol: symbol.clone(),
                expected: spec.kind.clone().unwrap_or_default(),
                found: id.kind.clone(),
            });
        }
    }

    Ok(())
}
