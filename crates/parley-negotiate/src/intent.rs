//! Intents, actions, features and catalogs.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parley_core::{
    Anchor, AnchorSchema, BindError, DescriptorError, FactStream, Symbol, SymbolSpec,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::When;

/// Kind of action, carried through to the execution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionCategory {
    Get,
    Update,
    Delete,
    Show,
}

/// A `then` transform failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ValidationError> for TransformError {
    fn from(error: ValidationError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<BindError> for TransformError {
    fn from(error: BindError) -> Self {
        Self::new(error.to_string())
    }
}

/// The body of an action: given the anchor, produce the final anchor and the
/// facts to commit.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(
        &self,
        anchor: Anchor,
        stream: FactStream,
    ) -> Result<(Anchor, FactStream), TransformError>;
}

type TransformFn = dyn Fn(Anchor, FactStream) -> BoxFuture<'static, Result<(Anchor, FactStream), TransformError>>
    + Send
    + Sync;

/// A [`Transform`] backed by an async closure.
pub struct FnTransform {
    f: Box<TransformFn>,
}

#[async_trait]
impl Transform for FnTransform {
    async fn apply(
        &self,
        anchor: Anchor,
        stream: FactStream,
    ) -> Result<(Anchor, FactStream), TransformError> {
        (self.f)(anchor, stream).await
    }
}

/// Wrap an async closure as a shareable transform.
pub fn transform<F, Fut>(f: F) -> Arc<dyn Transform>
where
    F: Fn(Anchor, FactStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(Anchor, FactStream), TransformError>> + Send + 'static,
{
    Arc::new(FnTransform {
        f: Box::new(move |anchor, stream| f(anchor, stream).boxed()),
    })
}

/// A way of carrying out an intent.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub category: ActionCategory,

    /// All clauses must hold for this action to be selected.
    pub when: Vec<When>,

    pub then: Arc<dyn Transform>,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        category: ActionCategory,
        then: Arc<dyn Transform>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            when: Vec::new(),
            then,
        }
    }

    /// Add a selection clause.
    pub fn when(mut self, clause: When) -> Self {
        self.when.push(clause);
        self
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("when", &self.when)
            .finish_non_exhaustive()
    }
}

/// A user goal the engine can negotiate and execute.
#[derive(Debug, Clone)]
pub struct Intent {
    pub name: String,

    /// What the intent is for, one line per entry.
    pub purpose: Vec<String>,

    /// Symbols the negotiator must bind.
    pub anchor: AnchorSchema,

    /// Conditions for leaving `Disabled`.
    pub enable: Vec<When>,

    /// Conditions that prompt the negotiator while the anchor is incomplete.
    pub reminder: Vec<When>,

    /// Candidate actions, in selection order.
    pub actions: Vec<Action>,
}

impl Intent {
    pub fn builder(name: impl Into<String>) -> IntentBuilder {
        IntentBuilder::new(name)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Builder for [`Intent`].
pub struct IntentBuilder {
    name: String,
    purpose: Vec<String>,
    anchor: AnchorSchema,
    enable: Vec<When>,
    reminder: Vec<When>,
    actions: Vec<Action>,
}

impl IntentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            purpose: Vec::new(),
            anchor: AnchorSchema::new(),
            enable: Vec::new(),
            reminder: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn purpose(mut self, line: impl Into<String>) -> Self {
        self.purpose.push(line.into());
        self
    }

    /// Declare an anchor symbol.
    pub fn symbol(mut self, symbol: impl Into<Symbol>, spec: SymbolSpec) -> Self {
        self.anchor = self.anchor.symbol(symbol, spec);
        self
    }

    pub fn enable(mut self, clause: When) -> Self {
        self.enable.push(clause);
        self
    }

    pub fn reminder(mut self, clause: When) -> Self {
        self.reminder.push(clause);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Build the intent.
    pub fn build(self) -> Result<Intent, DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.actions.is_empty() {
            return Err(DescriptorError::NoActions { intent: self.name });
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.name.as_str()) {
                return Err(DescriptorError::DuplicateAction {
                    intent: self.name.clone(),
                    action: action.name.clone(),
                });
            }
        }

        Ok(Intent {
            name: self.name,
            purpose: self.purpose,
            anchor: self.anchor,
            enable: self.enable,
            reminder: self.reminder,
            actions: self.actions,
        })
    }
}

/// A named group of related intents.
#[derive(Debug, Clone)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub intents: Vec<Arc<Intent>>,
}

impl Feature {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            intents: Vec::new(),
        }
    }

    pub fn intent(mut self, intent: Intent) -> Self {
        self.intents.push(Arc::new(intent));
        self
    }
}

/// Every feature a host offers.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub features: Vec<Feature>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn intents(&self) -> impl Iterator<Item = &Arc<Intent>> {
        self.features.iter().flat_map(|f| f.intents.iter())
    }

    /// Find an intent by name across all features.
    pub fn find(&self, name: &str) -> Option<Arc<Intent>> {
        self.intents().find(|i| i.name == name).cloned()
    }
}
