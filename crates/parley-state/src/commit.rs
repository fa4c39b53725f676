//! Entity-scoped commit of net effects.
//!
//! Each entity is applied independently. A failure on one entity never rolls
//! back the ones already applied; the report says exactly what happened.

use parley_core::{BoundEntity, EntityKey, StoreError};
use parley_merge::{splice, EffectShape, NetEffect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{PersistentStore, StoredValue};

/// Commit behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitOptions {
    /// Stop at the first failed entity; the rest are reported as not attempted.
    pub stop_on_failure: bool,

    /// Use the store's multi-entity transaction when it offers one.
    pub prefer_batch: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
            prefer_batch: false,
        }
    }
}

/// What happened to one entity's net effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitStatus {
    Applied,
    Failed { error: String, transient: bool },
    NotAttempted,
}

impl From<&StoreError> for CommitStatus {
    fn from(error: &StoreError) -> Self {
        CommitStatus::Failed {
            error: error.to_string(),
            transient: error.is_transient(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCommit {
    pub entity: EntityKey,
    pub effect: EffectShape,
    pub status: CommitStatus,
}

/// Per-entity outcome of a commit, in merge order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub entities: Vec<EntityCommit>,

    /// Whether the effects went through a single store transaction.
    pub batched: bool,

    /// Whether the commit stopped early because it was cancelled.
    pub cancelled: bool,
}

impl CommitReport {
    pub fn applied(&self) -> impl Iterator<Item = &EntityCommit> {
        self.entities
            .iter()
            .filter(|e| e.status == CommitStatus::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityCommit> {
        self.entities
            .iter()
            .filter(|e| matches!(e.status, CommitStatus::Failed { .. }))
    }

    pub fn not_attempted(&self) -> impl Iterator<Item = &EntityCommit> {
        self.entities
            .iter()
            .filter(|e| e.status == CommitStatus::NotAttempted)
    }

    /// True when every entity was applied.
    pub fn is_complete(&self) -> bool {
        self.entities
            .iter()
            .all(|e| e.status == CommitStatus::Applied)
    }

    /// First failure message, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.entities.iter().find_map(|e| match &e.status {
            CommitStatus::Failed { error, .. } => Some(error.as_str()),
            _ => None,
        })
    }
}

/// Apply net effects to the store.
///
/// `is_cancelled` is polled before each entity; once it returns true the
/// remaining entities are left untouched.
pub async fn commit<F>(
    store: &dyn PersistentStore,
    effects: &[(BoundEntity, NetEffect)],
    options: &CommitOptions,
    is_cancelled: F,
) -> CommitReport
where
    F: Fn() -> bool,
{
    let mut report = CommitReport::default();

    if options.prefer_batch && effects.len() > 1 && !is_cancelled() {
        if let Some(result) = store.apply_batch(effects).await {
            report.batched = true;
            let status = match &result {
                Ok(()) => CommitStatus::Applied,
                Err(e) => {
                    warn!(error = %e, "Batch commit failed");
                    CommitStatus::from(e)
                }
            };
            report.entities = effects
                .iter()
                .map(|(entity, effect)| EntityCommit {
                    entity: entity.key(),
                    effect: effect.shape(),
                    status: status.clone(),
                })
                .collect();
            info!(entities = effects.len(), ok = result.is_ok(), "Committed batch");
            return report;
        }
        debug!("Store has no batch support, committing per entity");
    }

    let mut halted = false;
    for (entity, effect) in effects {
        let key = entity.key();

        if !halted && is_cancelled() {
            report.cancelled = true;
            halted = true;
        }

        let status = if halted {
            CommitStatus::NotAttempted
        } else {
            match apply_one(store, entity, effect).await {
                Ok(()) => {
                    debug!(entity = %key, effect = ?effect.shape(), "Applied");
                    CommitStatus::Applied
                }
                Err(e) => {
                    warn!(entity = %key, error = %e, "Commit failed");
                    halted = options.stop_on_failure;
                    CommitStatus::from(&e)
                }
            }
        };

        report.entities.push(EntityCommit {
            entity: key,
            effect: effect.shape(),
            status,
        });
    }

    info!(
        applied = report.applied().count(),
        failed = report.failed().count(),
        skipped = report.not_attempted().count(),
        "Commit finished"
    );

    report
}

async fn apply_one(
    store: &dyn PersistentStore,
    entity: &BoundEntity,
    effect: &NetEffect,
) -> Result<(), StoreError> {
    if let NetEffect::Splice(ops) = effect {
        if !splice::stored_pivots(ops).is_empty() {
            check_pivots(store, entity, ops).await?;
        }
    }
    store.apply_net_effect(entity, effect).await
}

/// Dry-run splices against the stored sequence so a missing pivot fails
/// before anything is written.
async fn check_pivots(
    store: &dyn PersistentStore,
    entity: &BoundEntity,
    ops: &[parley_merge::SpliceOp],
) -> Result<(), StoreError> {
    let mut items = match store.read_current_value(entity).await? {
        StoredValue::Unset => Vec::new(),
        StoredValue::Sequence(items) => items,
        _ => {
            return Err(StoreError::ShapeMismatch {
                entity: entity.key(),
            })
        }
    };

    splice::apply_all(&mut items, ops).map_err(|e| StoreError::PivotNotFound {
        entity: entity.key(),
        pivot: e.0.to_string(),
    })
}
