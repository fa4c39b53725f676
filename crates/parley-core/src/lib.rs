//! # Parley Core
//!
//! Core primitives and types for the Parley engine.
//!
//! This crate provides the fundamental building blocks:
//! - [`Anchor`] - Bindings of formal symbols to persistent entities
//! - [`PropertyDescriptor`] / [`RelationDescriptor`] - Immutable schemas
//! - [`BoundEntity`] - A descriptor bound to one anchor (see [`bind`])
//! - [`Fact`] / [`FactStream`] - Mutations and the unit of validation
//! - [`ParleyError`] - Error taxonomy

pub mod anchor;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod fact;
pub mod stream;
pub mod types;

// Re-exports for convenience
pub use anchor::{Anchor, AnchorSchema, Entry};
pub use descriptor::{
    Descriptor, DescriptorRegistry, ElementDomain, PropertyDescriptor, PropertyShape,
    RelationDescriptor, StaticRegistry,
};
pub use entity::{bind, bind_entry, BoundEntity, BoundProperty, BoundRelation, EntityKey};
pub use error::{
    BindError, DescriptorError, EvaluationError, MergeError, ParleyError, Result, StoreError,
    ValidationError,
};
pub use fact::{Fact, Mutation, RelationOp, ScalarOp, SequenceOp, SetOp};
pub use stream::{validate, FactStream};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::anchor::{Anchor, AnchorSchema, Entry};
    pub use crate::descriptor::{
        Descriptor, DescriptorRegistry, ElementDomain, PropertyDescriptor, PropertyShape,
        RelationDescriptor, StaticRegistry,
    };
    pub use crate::entity::{BoundEntity, EntityKey};
    pub use crate::error::{ParleyError, Result};
    pub use crate::fact::{Fact, Mutation, RelationOp, ScalarOp, SequenceOp, SetOp};
    pub use crate::stream::FactStream;
    pub use crate::types::{EntityId, Symbol, SymbolRole, SymbolSpec, ValueKind};
}
