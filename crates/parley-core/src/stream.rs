//! Fact streams and the fact stream validator.
//!
//! A stream is an ordered batch of facts sharing one anchor and one
//! dictionary of bound entities. It is the unit of validation and merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::anchor::Anchor;
use crate::descriptor::{
    Descriptor, DescriptorRegistry, PropertyDescriptor, RelationDescriptor,
};
use crate::entity::{bind_entry, bind_property, bind_relation, BoundEntity, BoundProperty, BoundRelation, EntityKey};
use crate::error::{BindError, ValidationError};
use crate::fact::{Fact, Mutation};
use crate::types::Symbol;

/// Ordered facts over one anchor and one entity dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactStream {
    /// Bindings shared by every entity in the stream.
    pub anchor: Anchor,

    /// Bound property entities, keyed by dictionary symbol.
    pub properties: BTreeMap<Symbol, BoundProperty>,

    /// Bound relation entities, keyed by dictionary symbol.
    pub relations: BTreeMap<Symbol, BoundRelation>,

    /// Facts in stream order.
    pub facts: Vec<Fact>,
}

impl FactStream {
    /// Create an empty stream over `anchor`.
    pub fn new(anchor: Anchor) -> Self {
        Self {
            anchor,
            ..Default::default()
        }
    }

    /// Bind a property descriptor against the stream anchor and add it to
    /// the dictionary under `key`.
    pub fn with_property(
        mut self,
        key: impl Into<Symbol>,
        descriptor: &Arc<PropertyDescriptor>,
    ) -> Result<Self, BindError> {
        let bound = bind_property(descriptor, &self.anchor)?;
        self.properties.insert(key.into(), bound);
        Ok(self)
    }

    /// Bind a relation descriptor against the stream anchor and add it to
    /// the dictionary under `key`.
    pub fn with_relation(
        mut self,
        key: impl Into<Symbol>,
        descriptor: &Arc<RelationDescriptor>,
    ) -> Result<Self, BindError> {
        let bound = bind_relation(descriptor, &self.anchor)?;
        self.relations.insert(key.into(), bound);
        Ok(self)
    }

    /// Look up a dictionary entity by its key.
    pub fn entity(&self, key: &Symbol) -> Option<BoundEntity> {
        self.properties
            .get(key)
            .cloned()
            .map(BoundEntity::Property)
            .or_else(|| self.relations.get(key).cloned().map(BoundEntity::Relation))
    }

    /// Append a fact targeting the dictionary entity stored under `key`.
    pub fn record(&mut self, key: impl Into<Symbol>, mutation: Mutation) -> Result<(), ValidationError> {
        let key = key.into();
        let entity = self.entity(&key).ok_or_else(|| ValidationError::UnknownEntityInStream {
            index: self.facts.len(),
            entity: EntityKey::new(key.as_str(), Anchor::new()),
        })?;
        self.facts.push(Fact::new(entity.key(), mutation));
        Ok(())
    }

    /// Append a fact, returning the stream.
    pub fn fact(mut self, key: impl Into<Symbol>, mutation: Mutation) -> Result<Self, ValidationError> {
        self.record(key, mutation)?;
        Ok(self)
    }

    /// Every dictionary entity, properties first.
    pub fn entities(&self) -> impl Iterator<Item = BoundEntity> + '_ {
        self.properties
            .values()
            .cloned()
            .map(BoundEntity::Property)
            .chain(self.relations.values().cloned().map(BoundEntity::Relation))
    }

    /// Find the dictionary entity with this exact key.
    pub fn resolve(&self, key: &EntityKey) -> Option<BoundEntity> {
        self.entities().find(|e| &e.key() == key)
    }

    /// Validate the stream. See [`validate`].
    pub fn validate(&self, registry: &dyn DescriptorRegistry) -> Result<(), ValidationError> {
        validate(self, registry)
    }
}

/// Check the dictionaries against the registry, then each fact in stream
/// order. Returns the first error encountered.
pub fn validate(stream: &FactStream, registry: &dyn DescriptorRegistry) -> Result<(), ValidationError> {
    check_dictionaries(stream, registry)?;

    for (index, fact) in stream.facts.iter().enumerate() {
        check_fact(stream, index, fact)?;
    }

    debug!(facts = stream.facts.len(), "Fact stream validated");
    Ok(())
}

fn check_dictionaries(
    stream: &FactStream,
    registry: &dyn DescriptorRegistry,
) -> Result<(), ValidationError> {
    for bound in stream.properties.values() {
        let registered = registry.lookup(&bound.descriptor.name);
        if registered != Some(Descriptor::Property(Arc::clone(&bound.descriptor))) {
            return Err(ValidationError::UnregisteredDescriptor {
                name: bound.descriptor.name.clone(),
            });
        }
    }

    for bound in stream.relations.values() {
        let name = &bound.descriptor.name;
        if stream.properties.values().any(|p| &p.descriptor.name == name) {
            return Err(ValidationError::DescriptorRoleConflict { name: name.clone() });
        }

        let registered = registry.lookup(name);
        if registered != Some(Descriptor::Relation(Arc::clone(&bound.descriptor))) {
            return Err(ValidationError::UnregisteredDescriptor { name: name.clone() });
        }
    }

    Ok(())
}

fn check_fact(stream: &FactStream, index: usize, fact: &Fact) -> Result<(), ValidationError> {
    let entity = &fact.entity;

    let known = stream.entities().any(|e| e.name() == entity.descriptor);
    if !known {
        return Err(ValidationError::UnknownEntityInStream {
            index,
            entity: entity.clone(),
        });
    }

    if let Some(symbol) = entity.anchor.drift_from(&stream.anchor) {
        return Err(ValidationError::AnchorDrift {
            index,
            entity: entity.clone(),
            symbol: symbol.clone(),
        });
    }

    let bound = stream
        .resolve(entity)
        .ok_or_else(|| ValidationError::UnknownEntityInStream {
            index,
            entity: entity.clone(),
        })?;

    let kind = bound.kind();
    let action = fact.mutation.code();
    if fact.mutation.kind() != kind || !kind.admits(action) {
        return Err(ValidationError::IllegalActionForKind {
            index,
            entity: entity.clone(),
            action,
            kind,
        });
    }

    match &bound {
        BoundEntity::Property(p) => {
            if !fact.mutation.values().into_iter().all(|v| p.descriptor.element.admits(v)) {
                return Err(ValidationError::ValueOutsideDomain {
                    index,
                    entity: entity.clone(),
                });
            }
        }
        BoundEntity::Relation(r) => {
            for entry in fact.mutation.entries() {
                bind_entry(&r.descriptor, entry).map_err(|source| ValidationError::MalformedEntry {
                    index,
                    entity: entity.clone(),
                    source,
                })?;
            }
        }
    }

    Ok(())
}
