//! Conditions gating intents, actions and reminders.
//!
//! A [`When`] clause carries advisory `soft` text for the negotiator and an
//! optional `hard` predicate that is actually awaited. Soft-only clauses are
//! always true for gating purposes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parley_core::{Anchor, EvaluationError};
use tracing::debug;

/// Asynchronous boolean check over the current anchor.
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn check(&self, anchor: &Anchor) -> Result<bool, EvaluationError>;
}

type PredicateFn =
    dyn Fn(Anchor) -> BoxFuture<'static, Result<bool, EvaluationError>> + Send + Sync;

/// A [`Predicate`] backed by an async closure.
pub struct FnPredicate {
    f: Box<PredicateFn>,
}

#[async_trait]
impl Predicate for FnPredicate {
    async fn check(&self, anchor: &Anchor) -> Result<bool, EvaluationError> {
        (self.f)(anchor.clone()).await
    }
}

/// Wrap an async closure as a shareable predicate.
pub fn predicate<F, Fut>(f: F) -> Arc<dyn Predicate>
where
    F: Fn(Anchor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, EvaluationError>> + Send + 'static,
{
    Arc::new(FnPredicate {
        f: Box::new(move |anchor| f(anchor).boxed()),
    })
}

/// One condition clause.
#[derive(Clone, Default)]
pub struct When {
    /// Human-readable guidance surfaced to the negotiator.
    pub soft: Vec<String>,

    /// Machine-checkable predicate.
    pub hard: Option<Arc<dyn Predicate>>,
}

impl When {
    /// A purely informational clause.
    pub fn soft(text: impl Into<String>) -> Self {
        Self {
            soft: vec![text.into()],
            hard: None,
        }
    }

    /// A clause decided by `predicate`.
    pub fn hard(predicate: Arc<dyn Predicate>) -> Self {
        Self {
            soft: Vec::new(),
            hard: Some(predicate),
        }
    }

    /// Add advisory text.
    pub fn with_soft(mut self, text: impl Into<String>) -> Self {
        self.soft.push(text.into());
        self
    }

    pub fn is_informational(&self) -> bool {
        self.hard.is_none()
    }
}

impl fmt::Debug for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("When")
            .field("soft", &self.soft)
            .field("hard", &self.hard.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Evaluate a conjunction of clauses.
///
/// Hard predicates run in declaration order and evaluation stops at the first
/// false one. A predicate error or timeout is returned as an error, never as
/// `false`.
pub async fn evaluate(
    conditions: &[When],
    anchor: &Anchor,
    timeout: Duration,
) -> Result<bool, EvaluationError> {
    for (index, clause) in conditions.iter().enumerate() {
        let Some(hard) = &clause.hard else {
            continue;
        };

        let holds = tokio::time::timeout(timeout, hard.check(anchor))
            .await
            .map_err(|_| EvaluationError::Timeout {
                duration_ms: millis(timeout),
            })??;

        if !holds {
            debug!(clause = index, "Condition is false");
            return Ok(false);
        }
    }
    Ok(true)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// All soft text of `conditions`, in order.
pub fn soft_hints(conditions: &[When]) -> Vec<String> {
    conditions
        .iter()
        .flat_map(|clause| clause.soft.iter().cloned())
        .collect()
}
