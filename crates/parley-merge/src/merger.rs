//! Reduction of ordered facts to per-entity net effects.
//!
//! Facts fold left to right:
//! - `clear` drops everything pending and marks the entity cleared.
//! - `assign` replaces the pending value wholesale.
//! - `insert`/`remove` on a set or relation accumulate in pending insertion
//!   and removal sets; the latest fact touching an element wins.
//! - `append`/`prepend` accumulate ordered splices.
//!
//! Additive facts after a `clear` or `assign` fold into the known value, so
//! the result is always a single [`NetEffect`].

use std::collections::HashMap;

use parley_core::{
    BoundEntity, EntityKey, FactStream, MergeError, Mutation, ParleyError, RelationOp, ScalarOp,
    SequenceOp, SetOp, ValidationError,
};
use serde_json::Value;
use tracing::debug;

use crate::effect::{Assignment, Changes, Delta, NetEffect};
use crate::splice::{self, Pivot, SpliceOp};

/// Merge the ordered mutations targeting `entity` into one net effect.
pub fn merge<'a, I>(entity: &BoundEntity, facts: I) -> Result<NetEffect, MergeError>
where
    I: IntoIterator<Item = &'a Mutation>,
{
    let key = entity.key();
    let kind = entity.kind();
    let mut reducer = Reducer::for_entity(entity);
    let mut merged = 0usize;

    for mutation in facts {
        if mutation.kind() != kind || !kind.admits(mutation.code()) {
            return Err(MergeError::ConflictingActionForKind {
                entity: key,
                action: mutation.code(),
                kind,
            });
        }
        reducer.fold(mutation, &key)?;
        merged += 1;
    }

    if merged == 0 {
        return Err(MergeError::NoFacts { entity: key });
    }

    let effect = reducer.finish();
    debug!(entity = %key, facts = merged, shape = ?effect.shape(), "Merged facts");
    Ok(effect)
}

/// Merge every entity touched by `stream`, in order of first appearance.
///
/// The stream should already be validated; a fact whose entity is missing
/// from the dictionaries is reported as a validation error.
pub fn merge_stream(stream: &FactStream) -> Result<Vec<(BoundEntity, NetEffect)>, ParleyError> {
    let mut order: Vec<&EntityKey> = Vec::new();
    let mut grouped: HashMap<&EntityKey, Vec<&Mutation>> = HashMap::new();

    for fact in &stream.facts {
        grouped
            .entry(&fact.entity)
            .or_insert_with(|| {
                order.push(&fact.entity);
                Vec::new()
            })
            .push(&fact.mutation);
    }

    let mut effects = Vec::with_capacity(order.len());
    for key in order {
        let entity = stream.resolve(key).ok_or_else(|| {
            let index = stream
                .facts
                .iter()
                .position(|f| &f.entity == key)
                .unwrap_or_default();
            ValidationError::UnknownEntityInStream {
                index,
                entity: key.clone(),
            }
        })?;

        let mutations = grouped.remove(key).unwrap_or_default();
        let effect = merge(&entity, mutations)?;
        effects.push((entity, effect));
    }

    Ok(effects)
}

enum Reducer {
    Scalar(ScalarState),
    Set(Collection<Value>),
    Sequence(SequenceState),
    Relation(Collection<parley_core::Entry>),
}

impl Reducer {
    fn for_entity(entity: &BoundEntity) -> Self {
        match entity.kind() {
            parley_core::ValueKind::Scalar => Reducer::Scalar(ScalarState::Untouched),
            parley_core::ValueKind::Set => Reducer::Set(Collection::default()),
            parley_core::ValueKind::Sequence => Reducer::Sequence(SequenceState::default()),
            parley_core::ValueKind::Relation => Reducer::Relation(Collection::default()),
        }
    }

    fn fold(&mut self, mutation: &Mutation, key: &EntityKey) -> Result<(), MergeError> {
        match (self, mutation) {
            (Reducer::Scalar(state), Mutation::Scalar(op)) => {
                *state = match op {
                    ScalarOp::Clear => ScalarState::Cleared,
                    ScalarOp::Assign(v) => ScalarState::Assigned(v.clone()),
                };
            }
            (Reducer::Set(set), Mutation::Set(op)) => match op {
                SetOp::Clear => set.clear(),
                SetOp::Assign(vs) => set.assign(vs),
                SetOp::Insert(vs) => set.insert(vs),
                SetOp::Remove(vs) => set.remove(vs),
            },
            (Reducer::Relation(rel), Mutation::Relation(op)) => match op {
                RelationOp::Clear => rel.clear(),
                RelationOp::Assign(es) => rel.assign(es),
                RelationOp::Insert(es) => rel.insert(es),
                RelationOp::Remove(es) => rel.remove(es),
            },
            (Reducer::Sequence(seq), Mutation::Sequence(op)) => seq.fold(op, key)?,
            (reducer, mutation) => {
                return Err(MergeError::ConflictingActionForKind {
                    entity: key.clone(),
                    action: mutation.code(),
                    kind: reducer.kind(),
                })
            }
        }
        Ok(())
    }

    fn kind(&self) -> parley_core::ValueKind {
        match self {
            Reducer::Scalar(_) => parley_core::ValueKind::Scalar,
            Reducer::Set(_) => parley_core::ValueKind::Set,
            Reducer::Sequence(_) => parley_core::ValueKind::Sequence,
            Reducer::Relation(_) => parley_core::ValueKind::Relation,
        }
    }

    fn finish(self) -> NetEffect {
        match self {
            Reducer::Scalar(ScalarState::Assigned(v)) => NetEffect::Assign(Assignment::Scalar(v)),
            // Untouched only happens with no facts, which merge rejects.
            Reducer::Scalar(_) => NetEffect::Clear,
            Reducer::Set(set) => match set.finish() {
                Folded::Clear => NetEffect::Clear,
                Folded::Assign(items) => NetEffect::Assign(Assignment::Set(items)),
                Folded::Delta(changes) => NetEffect::Delta(Delta::Set(changes)),
            },
            Reducer::Relation(rel) => match rel.finish() {
                Folded::Clear => NetEffect::Clear,
                Folded::Assign(entries) => NetEffect::Assign(Assignment::Relation(entries)),
                Folded::Delta(changes) => NetEffect::Delta(Delta::Relation(changes)),
            },
            Reducer::Sequence(seq) => seq.finish(),
        }
    }
}

enum ScalarState {
    Untouched,
    Cleared,
    Assigned(Value),
}

enum Folded<T> {
    Clear,
    Assign(Vec<T>),
    Delta(Changes<T>),
}

/// Set or relation reduction state.
enum Collection<T> {
    /// Stored value unknown; only changes are tracked.
    Pending(Changes<T>),
    /// Value fully determined by a clear or assign in this merge.
    Known { items: Vec<T>, cleared: bool },
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection::Pending(Changes::default())
    }
}

impl<T: Clone + PartialEq> Collection<T> {
    fn clear(&mut self) {
        *self = Collection::Known {
            items: Vec::new(),
            cleared: true,
        };
    }

    fn assign(&mut self, values: &[T]) {
        let mut items = Vec::with_capacity(values.len());
        for v in values {
            if !items.contains(v) {
                items.push(v.clone());
            }
        }
        *self = Collection::Known {
            items,
            cleared: false,
        };
    }

    fn insert(&mut self, values: &[T]) {
        match self {
            Collection::Pending(changes) => {
                for v in values {
                    changes.removed.retain(|r| r != v);
                    if !changes.inserted.contains(v) {
                        changes.inserted.push(v.clone());
                    }
                }
            }
            Collection::Known { items, .. } => {
                for v in values {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            }
        }
    }

    fn remove(&mut self, values: &[T]) {
        match self {
            Collection::Pending(changes) => {
                for v in values {
                    changes.inserted.retain(|i| i != v);
                    if !changes.removed.contains(v) {
                        changes.removed.push(v.clone());
                    }
                }
            }
            Collection::Known { items, .. } => items.retain(|i| !values.contains(i)),
        }
    }

    fn finish(self) -> Folded<T> {
        match self {
            Collection::Pending(changes) => Folded::Delta(changes),
            Collection::Known {
                items,
                cleared: true,
            } if items.is_empty() => Folded::Clear,
            Collection::Known { items, .. } => Folded::Assign(items),
        }
    }
}

/// Sequence reduction state.
enum SequenceState {
    Pending(Vec<SpliceOp>),
    Known { items: Vec<Value>, cleared: bool },
}

impl Default for SequenceState {
    fn default() -> Self {
        SequenceState::Pending(Vec::new())
    }
}

impl SequenceState {
    fn fold(&mut self, op: &SequenceOp, key: &EntityKey) -> Result<(), MergeError> {
        let splice = match op {
            SequenceOp::Clear => {
                *self = SequenceState::Known {
                    items: Vec::new(),
                    cleared: true,
                };
                return Ok(());
            }
            SequenceOp::Assign(values) => {
                *self = SequenceState::Known {
                    items: values.clone(),
                    cleared: false,
                };
                return Ok(());
            }
            SequenceOp::Remove(values) => SpliceOp::Remove(values.clone()),
            SequenceOp::Append { after, values } => SpliceOp::Insert {
                at: after.clone().map_or(Pivot::End, Pivot::After),
                values: values.clone(),
            },
            SequenceOp::Prepend { before, values } => SpliceOp::Insert {
                at: before.clone().map_or(Pivot::Start, Pivot::Before),
                values: values.clone(),
            },
        };

        match self {
            SequenceState::Pending(ops) => ops.push(splice),
            SequenceState::Known { items, .. } => {
                splice::apply(items, &splice).map_err(|e| MergeError::UnresolvedPivot {
                    entity: key.clone(),
                    pivot: e.0.to_string(),
                })?;
            }
        }
        Ok(())
    }

    fn finish(self) -> NetEffect {
        match self {
            SequenceState::Pending(ops) => NetEffect::Splice(ops),
            SequenceState::Known {
                items,
                cleared: true,
            } if items.is_empty() => NetEffect::Clear,
            SequenceState::Known { items, .. } => NetEffect::Assign(Assignment::Sequence(items)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectShape;
    use parley_core::{
        bind, Anchor, Descriptor, EntityId, Entry, PropertyDescriptor, PropertyShape,
        RelationDescriptor, SymbolSpec, ValueKind,
    };
    use serde_json::json;

    fn anchor() -> Anchor {
        Anchor::new().with("entity", EntityId::new("order", "42"))
    }

    fn property(name: &str, shape: PropertyShape) -> BoundEntity {
        let descriptor = PropertyDescriptor::builder(name, shape)
            .anchor("entity", SymbolSpec::required("order"))
            .build()
            .unwrap();
        bind(&Descriptor::Property(descriptor), &anchor()).unwrap()
    }

    fn relation() -> BoundEntity {
        let descriptor = RelationDescriptor::builder("order.lines")
            .anchor("entity", SymbolSpec::required("order"))
            .entry("sku", SymbolSpec::required("product"))
            .build()
            .unwrap();
        bind(&Descriptor::Relation(descriptor), &anchor()).unwrap()
    }

    fn entry(id: &str) -> Entry {
        Entry::new().with("sku", EntityId::new("sku", id))
    }

    #[test]
    fn test_append_after_fresh_value() {
        let items = property("items", PropertyShape::Sequence);
        let facts = vec![
            Mutation::Sequence(SequenceOp::Append {
                after: None,
                values: vec![json!("A"), json!("B")],
            }),
            Mutation::Sequence(SequenceOp::Append {
                after: Some(json!("A")),
                values: vec![json!("C")],
            }),
        ];

        let effect = merge(&items, &facts).unwrap();
        let ops = match effect {
            NetEffect::Splice(ops) => ops,
            other => panic!("expected splice, got {:?}", other),
        };

        let mut stored = Vec::new();
        splice::apply_all(&mut stored, &ops).unwrap();
        assert_eq!(stored, vec![json!("A"), json!("C"), json!("B")]);
    }

    #[test]
    fn test_assign_then_clear_is_clear() {
        let total = property("total", PropertyShape::Scalar);
        let facts = vec![
            Mutation::Scalar(ScalarOp::Assign(json!(5))),
            Mutation::Scalar(ScalarOp::Clear),
        ];
        assert_eq!(merge(&total, &facts).unwrap(), NetEffect::Clear);
    }

    #[test]
    fn test_clear_then_assign_replaces() {
        let total = property("total", PropertyShape::Scalar);
        let facts = vec![
            Mutation::Scalar(ScalarOp::Clear),
            Mutation::Scalar(ScalarOp::Assign(json!(7))),
        ];
        assert_eq!(
            merge(&total, &facts).unwrap(),
            NetEffect::Assign(Assignment::Scalar(json!(7)))
        );
    }

    #[test]
    fn test_insert_remove_order_matters() {
        let tags = property("tags", PropertyShape::Set);
        let insert = Mutation::Set(SetOp::Insert(vec![json!("x")]));
        let remove = Mutation::Set(SetOp::Remove(vec![json!("x")]));

        let forward = merge(&tags, [&insert, &remove]).unwrap();
        let reverse = merge(&tags, [&remove, &insert]).unwrap();

        assert_eq!(
            forward,
            NetEffect::Delta(Delta::Set(Changes {
                inserted: vec![],
                removed: vec![json!("x")],
            }))
        );
        assert_eq!(
            reverse,
            NetEffect::Delta(Delta::Set(Changes {
                inserted: vec![json!("x")],
                removed: vec![],
            }))
        );
        assert_ne!(forward, reverse);
    }

    #[test]
    fn test_relation_latest_insert_or_remove_wins() {
        let lines = relation();
        let insert = Mutation::Relation(RelationOp::Insert(vec![entry("7")]));
        let remove = Mutation::Relation(RelationOp::Remove(vec![entry("7")]));

        assert_eq!(
            merge(&lines, [&insert, &remove]).unwrap(),
            NetEffect::Delta(Delta::Relation(Changes {
                inserted: vec![],
                removed: vec![entry("7")],
            }))
        );
        assert_eq!(
            merge(&lines, [&remove, &insert, &remove, &insert]).unwrap(),
            NetEffect::Delta(Delta::Relation(Changes {
                inserted: vec![entry("7")],
                removed: vec![],
            }))
        );
    }

    #[test]
    fn test_assign_discards_preceding_additive_ops() {
        let tags = property("tags", PropertyShape::Set);
        let facts = vec![
            Mutation::Set(SetOp::Insert(vec![json!("a")])),
            Mutation::Set(SetOp::Remove(vec![json!("b")])),
            Mutation::Set(SetOp::Assign(vec![json!("c"), json!("c")])),
        ];

        let whole = merge(&tags, &facts).unwrap();
        let last_only = merge(&tags, &facts[2..]).unwrap();
        assert_eq!(whole, last_only);
        assert_eq!(whole, NetEffect::Assign(Assignment::Set(vec![json!("c")])));
    }

    #[test]
    fn test_additive_after_clear_folds_into_assign() {
        let tags = property("tags", PropertyShape::Set);
        let cleared_then_insert = vec![
            Mutation::Set(SetOp::Clear),
            Mutation::Set(SetOp::Insert(vec![json!("x")])),
        ];
        assert_eq!(
            merge(&tags, &cleared_then_insert).unwrap(),
            NetEffect::Assign(Assignment::Set(vec![json!("x")]))
        );

        let cleared_then_remove = vec![
            Mutation::Set(SetOp::Clear),
            Mutation::Set(SetOp::Remove(vec![json!("x")])),
        ];
        assert_eq!(merge(&tags, &cleared_then_remove).unwrap(), NetEffect::Clear);
    }

    #[test]
    fn test_relation_assign_then_insert() {
        let lines = relation();
        let facts = vec![
            Mutation::Relation(RelationOp::Insert(vec![entry("0")])),
            Mutation::Relation(RelationOp::Assign(vec![entry("1")])),
            Mutation::Relation(RelationOp::Insert(vec![entry("2")])),
        ];
        assert_eq!(
            merge(&lines, &facts).unwrap(),
            NetEffect::Assign(Assignment::Relation(vec![entry("1"), entry("2")]))
        );
    }

    #[test]
    fn test_sequence_after_assign_resolves_locally() {
        let items = property("items", PropertyShape::Sequence);
        let facts = vec![
            Mutation::Sequence(SequenceOp::Assign(vec![json!(1), json!(3)])),
            Mutation::Sequence(SequenceOp::Prepend {
                before: Some(json!(3)),
                values: vec![json!(2)],
            }),
        ];
        assert_eq!(
            merge(&items, &facts).unwrap(),
            NetEffect::Assign(Assignment::Sequence(vec![json!(1), json!(2), json!(3)]))
        );

        let unresolved = vec![
            Mutation::Sequence(SequenceOp::Clear),
            Mutation::Sequence(SequenceOp::Append {
                after: Some(json!("ghost")),
                values: vec![json!(1)],
            }),
        ];
        assert!(matches!(
            merge(&items, &unresolved),
            Err(MergeError::UnresolvedPivot { .. })
        ));
    }

    #[test]
    fn test_conflicting_action_for_kind() {
        let total = property("total", PropertyShape::Scalar);
        let facts = vec![Mutation::Set(SetOp::Remove(vec![json!(1)]))];
        match merge(&total, &facts) {
            Err(MergeError::ConflictingActionForKind { kind, .. }) => {
                assert_eq!(kind, ValueKind::Scalar)
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_single_shape_per_entity() {
        let tags = property("tags", PropertyShape::Set);
        let streams: Vec<Vec<Mutation>> = vec![
            vec![Mutation::Set(SetOp::Clear)],
            vec![Mutation::Set(SetOp::Insert(vec![json!(1)]))],
            vec![
                Mutation::Set(SetOp::Assign(vec![json!(1)])),
                Mutation::Set(SetOp::Remove(vec![json!(1)])),
            ],
        ];
        let shapes: Vec<EffectShape> = streams
            .iter()
            .map(|facts| merge(&tags, facts).unwrap().shape())
            .collect();
        assert_eq!(
            shapes,
            vec![EffectShape::Clear, EffectShape::Delta, EffectShape::Assign]
        );
    }

    #[test]
    fn test_no_facts() {
        let total = property("total", PropertyShape::Scalar);
        let facts: Vec<Mutation> = Vec::new();
        assert!(matches!(merge(&total, &facts), Err(MergeError::NoFacts { .. })));
    }

    #[test]
    fn test_merge_stream_groups_by_entity() {
        let descriptor = PropertyDescriptor::builder("items", PropertyShape::Sequence)
            .anchor("entity", SymbolSpec::required("order"))
            .build()
            .unwrap();
        let total = PropertyDescriptor::builder("total", PropertyShape::Scalar)
            .anchor("entity", SymbolSpec::required("order"))
            .build()
            .unwrap();

        let stream = FactStream::new(anchor())
            .with_property("items", &descriptor)
            .unwrap()
            .with_property("total", &total)
            .unwrap()
            .fact(
                "items",
                Mutation::Sequence(SequenceOp::Append {
                    after: None,
                    values: vec![json!("A")],
                }),
            )
            .unwrap()
            .fact("total", Mutation::Scalar(ScalarOp::Assign(json!(3))))
            .unwrap()
            .fact(
                "items",
                Mutation::Sequence(SequenceOp::Remove(vec![json!("A")])),
            )
            .unwrap();

        let effects = merge_stream(&stream).unwrap();
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].0.name(), "items");
        assert_eq!(effects[0].1.shape(), EffectShape::Splice);
        assert_eq!(effects[1].0.name(), "total");
        assert_eq!(
            effects[1].1,
            NetEffect::Assign(Assignment::Scalar(json!(3)))
        );
    }
}
