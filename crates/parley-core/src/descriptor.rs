//! Property and relation descriptors, and the registry that owns them.
//!
//! Descriptors are immutable, globally named schemas. They are never
//! instantiated, only referenced (through `Arc`) by bound entities and facts.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::anchor::AnchorSchema;
use crate::error::DescriptorError;
use crate::types::{EntityId, Symbol, SymbolSpec, ValueKind};

/// Domain of the element values a property stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDomain {
    /// Any JSON value.
    #[default]
    Any,
    Boolean,
    Integer,
    Number,
    Text,
    /// A persistent-entity identifier of the given kind.
    Entity { kind: String },
}

impl ElementDomain {
    /// Check whether a value belongs to this domain.
    pub fn admits(&self, value: &serde_json::Value) -> bool {
        match self {
            ElementDomain::Any => true,
            ElementDomain::Boolean => value.is_boolean(),
            ElementDomain::Integer => value.is_i64() || value.is_u64(),
            ElementDomain::Number => value.is_number(),
            ElementDomain::Text => value.is_string(),
            ElementDomain::Entity { kind } => {
                serde_json::from_value::<EntityId>(value.clone())
                    .map(|id| &id.kind == kind)
                    .unwrap_or(false)
            }
        }
    }
}

/// Value shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyShape {
    Scalar,
    Set,
    Sequence,
}

impl PropertyShape {
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyShape::Scalar => ValueKind::Scalar,
            PropertyShape::Set => ValueKind::Set,
            PropertyShape::Sequence => ValueKind::Sequence,
        }
    }
}

/// Schema of one scalar-, set- or sequence-valued attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Global name of the property.
    pub name: String,

    /// Purpose and meaning of the property and the values it stores.
    pub description: String,

    /// Anchor symbols required to address an instance.
    pub anchor: AnchorSchema,

    pub shape: PropertyShape,

    pub element: ElementDomain,
}

impl PropertyDescriptor {
    pub fn builder(name: impl Into<String>, shape: PropertyShape) -> PropertyDescriptorBuilder {
        PropertyDescriptorBuilder {
            name: name.into(),
            description: String::new(),
            anchor: AnchorSchema::new(),
            shape,
            element: ElementDomain::Any,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.shape.kind()
    }
}

/// Fluent builder for [`PropertyDescriptor`].
#[derive(Debug)]
pub struct PropertyDescriptorBuilder {
    name: String,
    description: String,
    anchor: AnchorSchema,
    shape: PropertyShape,
    element: ElementDomain,
}

impl PropertyDescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare an anchor symbol.
    pub fn anchor(mut self, symbol: impl Into<Symbol>, spec: SymbolSpec) -> Self {
        self.anchor = self.anchor.symbol(symbol, spec);
        self
    }

    pub fn element(mut self, element: ElementDomain) -> Self {
        self.element = element;
        self
    }

    pub fn build(self) -> Result<Arc<PropertyDescriptor>, DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        Ok(Arc::new(PropertyDescriptor {
            name: self.name,
            description: self.description,
            anchor: self.anchor,
            shape: self.shape,
            element: self.element,
        }))
    }
}

/// Schema of a set of entries attached to an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Global name of the relation.
    pub name: String,

    pub description: String,

    /// Anchor symbols required to address an instance.
    pub anchor: AnchorSchema,

    /// Entry symbols. Disjoint from the anchor symbols.
    pub entry: AnchorSchema,
}

impl RelationDescriptor {
    pub fn builder(name: impl Into<String>) -> RelationDescriptorBuilder {
        RelationDescriptorBuilder {
            name: name.into(),
            description: String::new(),
            anchor: AnchorSchema::new(),
            entry: AnchorSchema::new(),
        }
    }
}

/// Fluent builder for [`RelationDescriptor`].
#[derive(Debug)]
pub struct RelationDescriptorBuilder {
    name: String,
    description: String,
    anchor: AnchorSchema,
    entry: AnchorSchema,
}

impl RelationDescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn anchor(mut self, symbol: impl Into<Symbol>, spec: SymbolSpec) -> Self {
        self.anchor = self.anchor.symbol(symbol, spec);
        self
    }

    pub fn entry(mut self, symbol: impl Into<Symbol>, spec: SymbolSpec) -> Self {
        self.entry = self.entry.symbol(symbol, spec);
        self
    }

    pub fn build(self) -> Result<Arc<RelationDescriptor>, DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        if self.entry.iter().next().is_none() {
            return Err(DescriptorError::EmptyEntry { relation: self.name });
        }

        if let Some(symbol) = self.entry.symbols().find(|s| self.anchor.contains(s)) {
            return Err(DescriptorError::EntryCollidesWithAnchor {
                relation: self.name.clone(),
                symbol: symbol.clone(),
            });
        }

        Ok(Arc::new(RelationDescriptor {
            name: self.name,
            description: self.description,
            anchor: self.anchor,
            entry: self.entry,
        }))
    }
}

/// Either kind of descriptor, as returned by a registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Property(Arc<PropertyDescriptor>),
    Relation(Arc<RelationDescriptor>),
}

impl Descriptor {
    pub fn name(&self) -> &str {
        match self {
            Descriptor::Property(p) => &p.name,
            Descriptor::Relation(r) => &r.name,
        }
    }

    pub fn anchor(&self) -> &AnchorSchema {
        match self {
            Descriptor::Property(p) => &p.anchor,
            Descriptor::Relation(r) => &r.anchor,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Descriptor::Property(p) => p.kind(),
            Descriptor::Relation(_) => ValueKind::Relation,
        }
    }
}

impl From<Arc<PropertyDescriptor>> for Descriptor {
    fn from(descriptor: Arc<PropertyDescriptor>) -> Self {
        Descriptor::Property(descriptor)
    }
}

impl From<Arc<RelationDescriptor>> for Descriptor {
    fn from(descriptor: Arc<RelationDescriptor>) -> Self {
        Descriptor::Relation(descriptor)
    }
}

/// Read-only lookup of descriptors by global name.
pub trait DescriptorRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Descriptor>;
}

/// Registry populated once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    descriptors: HashMap<String, Descriptor>,
}

static GLOBAL_REGISTRY: OnceLock<StaticRegistry> = OnceLock::new();

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under its name.
    pub fn register(&mut self, descriptor: impl Into<Descriptor>) -> Result<(), DescriptorError> {
        let descriptor = descriptor.into();
        let name = descriptor.name().to_string();
        if self.descriptors.contains_key(&name) {
            return Err(DescriptorError::DuplicateDescriptor { name });
        }
        self.descriptors.insert(name, descriptor);
        Ok(())
    }

    /// Register a descriptor, returning the registry.
    pub fn with(mut self, descriptor: impl Into<Descriptor>) -> Result<Self, DescriptorError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freeze this registry as the process-wide registry.
    pub fn install_global(self) -> Result<&'static StaticRegistry, DescriptorError> {
        GLOBAL_REGISTRY
            .set(self)
            .map_err(|_| DescriptorError::RegistryAlreadyInstalled)?;
        GLOBAL_REGISTRY
            .get()
            .ok_or(DescriptorError::RegistryAlreadyInstalled)
    }

    /// The process-wide registry, if installed.
    pub fn global() -> Option<&'static StaticRegistry> {
        GLOBAL_REGISTRY.get()
    }
}

impl DescriptorRegistry for StaticRegistry {
    fn lookup(&self, name: &str) -> Option<Descriptor> {
        self.descriptors.get(name).cloned()
    }
}

impl<T: DescriptorRegistry + ?Sized> DescriptorRegistry for &T {
    fn lookup(&self, name: &str) -> Option<Descriptor> {
        (**self).lookup(name)
    }
}
