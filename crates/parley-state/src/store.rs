//! Persistent store boundary and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{BoundEntity, EntityKey, Entry, StoreError, ValueKind};
use parley_merge::{splice, Assignment, Changes, Delta, NetEffect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Current value of an entity in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    #[default]
    Unset,
    Scalar(Value),
    Set(Vec<Value>),
    Sequence(Vec<Value>),
    Relation(Vec<Entry>),
}

/// A versioned value of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub entity: EntityKey,

    pub value: StoredValue,

    /// Version number (monotonically increasing across the store).
    pub version: u64,

    /// Timestamp when this version was written.
    pub timestamp: DateTime<Utc>,
}

/// Transactional read/write interface of the persistent store.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Apply one entity's net effect.
    async fn apply_net_effect(&self, entity: &BoundEntity, effect: &NetEffect)
        -> Result<(), StoreError>;

    /// Read the entity's current value.
    async fn read_current_value(&self, entity: &BoundEntity) -> Result<StoredValue, StoreError>;

    /// Apply several entities' effects atomically, if the store supports it.
    ///
    /// Returns `None` when multi-entity transactions are unsupported.
    async fn apply_batch(
        &self,
        _effects: &[(BoundEntity, NetEffect)],
    ) -> Option<Result<(), StoreError>> {
        None
    }
}

/// In-memory implementation of [`PersistentStore`].
pub struct InMemoryStore {
    /// entity -> list of versions (append-only).
    state: Arc<RwLock<HashMap<EntityKey, Vec<StoredEntry>>>>,

    /// Global version counter.
    version: Arc<RwLock<u64>>,
}

impl InMemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HashMap::new())),
            version: Arc::new(RwLock::new(0)),
        }
    }

    async fn next_version(&self) -> u64 {
        let mut version = self.version.write().await;
        *version += 1;
        *version
    }

    /// Current value by key.
    pub async fn get(&self, key: &EntityKey) -> StoredValue {
        let state = self.state.read().await;
        latest(&state, key)
    }

    /// Every version written for `key`, oldest first.
    pub async fn history(&self, key: &EntityKey) -> Vec<StoredEntry> {
        let state = self.state.read().await;
        state.get(key).cloned().unwrap_or_default()
    }

    /// Seed a value directly.
    pub async fn put(&self, key: EntityKey, value: StoredValue) -> StoredEntry {
        let mut state = self.state.write().await;
        self.record(&mut state, key, value, Utc::now()).await
    }

    async fn record(
        &self,
        state: &mut HashMap<EntityKey, Vec<StoredEntry>>,
        key: EntityKey,
        value: StoredValue,
        timestamp: DateTime<Utc>,
    ) -> StoredEntry {
        let entry = StoredEntry {
            entity: key.clone(),
            value,
            version: self.next_version().await,
            timestamp,
        };
        state.entry(key).or_insert_with(Vec::new).push(entry.clone());
        entry
    }

    /// Get the current version of the store.
    pub async fn version(&self) -> u64 {
        *self.version.read().await
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn apply_net_effect(
        &self,
        entity: &BoundEntity,
        effect: &NetEffect,
    ) -> Result<(), StoreError> {
        let key = entity.key();
        // One guard spans the read and the write.
        let mut state = self.state.write().await;
        let next = apply_effect(&key, entity.kind(), latest(&state, &key), effect)?;
        let written = self.record(&mut state, key, next, Utc::now()).await;
        debug!(entity = %written.entity, version = written.version, "Applied net effect");
        Ok(())
    }

    async fn read_current_value(&self, entity: &BoundEntity) -> Result<StoredValue, StoreError> {
        Ok(self.get(&entity.key()).await)
    }

    async fn apply_batch(
        &self,
        effects: &[(BoundEntity, NetEffect)],
    ) -> Option<Result<(), StoreError>> {
        let mut state = self.state.write().await;

        // Compute every next value before writing any of them.
        let mut staged = Vec::with_capacity(effects.len());
        for (entity, effect) in effects {
            let key = entity.key();
            match apply_effect(&key, entity.kind(), latest(&state, &key), effect) {
                Ok(next) => staged.push((key, next)),
                Err(e) => return Some(Err(e)),
            }
        }

        let timestamp = Utc::now();
        for (key, value) in staged {
            self.record(&mut state, key, value, timestamp).await;
        }

        Some(Ok(()))
    }
}

fn latest(state: &HashMap<EntityKey, Vec<StoredEntry>>, key: &EntityKey) -> StoredValue {
    state
        .get(key)
        .and_then(|versions| versions.last())
        .map(|entry| entry.value.clone())
        .unwrap_or_default()
}

/// Compute the value that results from applying `effect` to `current`.
pub fn apply_effect(
    key: &EntityKey,
    kind: ValueKind,
    current: StoredValue,
    effect: &NetEffect,
) -> Result<StoredValue, StoreError> {
    let mismatch = || StoreError::ShapeMismatch {
        entity: key.clone(),
    };

    match (kind, effect) {
        (_, NetEffect::Clear) => Ok(StoredValue::Unset),
        (ValueKind::Scalar, NetEffect::Assign(Assignment::Scalar(v))) => {
            Ok(StoredValue::Scalar(v.clone()))
        }
        (ValueKind::Set, NetEffect::Assign(Assignment::Set(vs))) => Ok(StoredValue::Set(vs.clone())),
        (ValueKind::Sequence, NetEffect::Assign(Assignment::Sequence(vs))) => {
            Ok(StoredValue::Sequence(vs.clone()))
        }
        (ValueKind::Relation, NetEffect::Assign(Assignment::Relation(es))) => {
            Ok(StoredValue::Relation(es.clone()))
        }
        (ValueKind::Set, NetEffect::Delta(Delta::Set(changes))) => {
            let items = match current {
                StoredValue::Unset => Vec::new(),
                StoredValue::Set(items) => items,
                _ => return Err(mismatch()),
            };
            Ok(StoredValue::Set(apply_changes(items, changes)))
        }
        (ValueKind::Relation, NetEffect::Delta(Delta::Relation(changes))) => {
            let entries = match current {
                StoredValue::Unset => Vec::new(),
                StoredValue::Relation(entries) => entries,
                _ => return Err(mismatch()),
            };
            Ok(StoredValue::Relation(apply_changes(entries, changes)))
        }
        (ValueKind::Sequence, NetEffect::Splice(ops)) => {
            let mut items = match current {
                StoredValue::Unset => Vec::new(),
                StoredValue::Sequence(items) => items,
                _ => return Err(mismatch()),
            };
            splice::apply_all(&mut items, ops).map_err(|e| StoreError::PivotNotFound {
                entity: key.clone(),
                pivot: e.0.to_string(),
            })?;
            Ok(StoredValue::Sequence(items))
        }
        _ => Err(mismatch()),
    }
}

fn apply_changes<T: Clone + PartialEq>(mut items: Vec<T>, changes: &Changes<T>) -> Vec<T> {
    items.retain(|item| !changes.removed.contains(item));
    for item in &changes.inserted {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
    items
}
