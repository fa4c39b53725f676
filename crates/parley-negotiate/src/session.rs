//! Intent sessions.
//!
//! An [`IntentSession`] owns one intent execution: its anchor, its state and
//! its report. It talks to the upstream negotiator over a pair of channels
//! and is driven either one cycle at a time ([`IntentSession::step`]) or to
//! completion ([`IntentSession::run`]).
//!
//! Suspension points (hard predicates and `then` transforms) race against
//! abandonment, so an abandoned session never commits anything further.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_core::{Anchor, BindError, DescriptorRegistry, FactStream};
use parley_merge::merge_stream;
use parley_state::{commit, CommitStatus, PersistentStore};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::condition::{evaluate, soft_hints};
use crate::config::ExecutorConfig;
use crate::error::{Result, SessionError};
use crate::intent::Intent;
use crate::protocol::{NegotiatorSignal, NegotiatorUpdate, UnboundSymbol};
use crate::report::{ExecutionEventType, ExecutionReport, Outcome};
use crate::state::IntentState;

/// Requests abandonment of a session from another task.
#[derive(Clone)]
pub struct AbandonHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl AbandonHandle {
    pub fn abandon(&self, reason: impl Into<String>) {
        self.tx.send_replace(Some(reason.into()));
    }
}

/// One execution of an intent.
pub struct IntentSession {
    /// Unique ID for this session.
    pub id: Uuid,

    intent: Arc<Intent>,

    /// Current anchor (grows as the negotiator binds symbols).
    anchor: Anchor,

    state: IntentState,

    registry: Arc<dyn DescriptorRegistry>,

    store: Arc<dyn PersistentStore>,

    config: ExecutorConfig,

    /// Number of times reminders have fired.
    reminder_cycles: u32,

    /// Whether hints were sent for the current negotiation.
    hinted: bool,

    report: ExecutionReport,

    /// Channel for outgoing signals.
    signals: mpsc::Sender<NegotiatorSignal>,

    /// Channel for incoming updates.
    updates: mpsc::Receiver<NegotiatorUpdate>,

    abandon_tx: Arc<watch::Sender<Option<String>>>,
    abandon_rx: watch::Receiver<Option<String>>,
}

enum Wake {
    Update(Option<NegotiatorUpdate>),
    Abandon(String),
    Recheck,
}

impl IntentSession {
    /// Create a new session in the `Disabled` state.
    ///
    /// Returns the session, the sender the negotiator uses for updates, and
    /// the receiver on which the session emits signals.
    pub fn new(
        intent: Arc<Intent>,
        anchor: Anchor,
        registry: Arc<dyn DescriptorRegistry>,
        store: Arc<dyn PersistentStore>,
        config: ExecutorConfig,
    ) -> (
        Self,
        mpsc::Sender<NegotiatorUpdate>,
        mpsc::Receiver<NegotiatorSignal>,
    ) {
        let buffer = config.signal_buffer.max(1);
        let (signal_tx, signal_rx) = mpsc::channel(buffer);
        let (update_tx, update_rx) = mpsc::channel(buffer);
        let (abandon_tx, abandon_rx) = watch::channel(None);

        let id = Uuid::new_v4();
        let report = ExecutionReport::new(id, intent.name.clone(), anchor.clone());

        let session = Self {
            id,
            intent,
            anchor,
            state: IntentState::Disabled,
            registry,
            store,
            config,
            reminder_cycles: 0,
            hinted: false,
            report,
            signals: signal_tx,
            updates: update_rx,
            abandon_tx: Arc::new(abandon_tx),
            abandon_rx,
        };

        (session, update_tx, signal_rx)
    }

    pub fn state(&self) -> IntentState {
        self.state
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn report(&self) -> &ExecutionReport {
        &self.report
    }

    pub fn into_report(self) -> ExecutionReport {
        self.report
    }

    pub fn reminder_cycles(&self) -> u32 {
        self.reminder_cycles
    }

    pub fn abandon_handle(&self) -> AbandonHandle {
        AbandonHandle {
            tx: Arc::clone(&self.abandon_tx),
        }
    }

    /// Bind symbols of the intent anchor.
    pub fn bind(&mut self, bindings: Anchor) -> Result<()> {
        if !self.state.accepts_updates() {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                operation: "bind symbols",
            });
        }

        for (symbol, id) in bindings.iter() {
            let spec =
                self.intent
                    .anchor
                    .get(symbol)
                    .ok_or_else(|| SessionError::UnknownSymbol {
                        intent: self.intent.name.clone(),
                        symbol: symbol.clone(),
                    })?;

            if !spec.admits(id) {
                let mismatch = BindError::AnchorTypeMismatch {
                    descriptor: self.intent.name.clone(),
                    symbol: symbol.clone(),
                    expected: spec.kind.clone().unwrap_or_default(),
                    found: id.kind.clone(),
                };
                return Err(SessionError::Parley(mismatch.into()));
            }
        }

        debug!(session = %self.id, bindings = %bindings, "Symbols bound");
        self.report.record(
            ExecutionEventType::SymbolsBound,
            json!({ "bindings": bindings.to_string() }),
        );
        self.anchor.extend(bindings);
        Ok(())
    }

    /// Apply an update received from the negotiator.
    pub async fn apply_update(&mut self, update: NegotiatorUpdate) -> Result<()> {
        match update {
            NegotiatorUpdate::Bind { bindings } => self.bind(bindings),
            NegotiatorUpdate::Abandon { reason } => self.abandon(reason).await,
        }
    }

    /// Abandon the intent. Only valid before execution starts.
    pub async fn abandon(&mut self, reason: impl Into<String>) -> Result<()> {
        if !self.state.accepts_updates() {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                operation: "abandon",
            });
        }
        self.finish_abandoned(reason.into()).await;
        Ok(())
    }

    /// Run one evaluation cycle and return the resulting state.
    ///
    /// From `Disabled` this evaluates the enable conditions; with an
    /// incomplete anchor it negotiates (hints, reminders); with a complete
    /// anchor it selects an action and executes it to a terminal state.
    pub async fn step(&mut self) -> Result<IntentState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let pending = self.abandon_rx.borrow_and_update().clone();
        if let Some(reason) = pending {
            if self.state.accepts_updates() {
                self.finish_abandoned(reason).await;
            }
        }

        if self.state == IntentState::Disabled {
            let timeout = self.config.predicate_timeout();
            let enabled = match interruptible(
                &mut self.abandon_rx,
                evaluate(&self.intent.enable, &self.anchor, timeout),
            )
            .await
            {
                Ok(enabled) => enabled?,
                Err(reason) => {
                    self.finish_abandoned(reason).await;
                    return Ok(self.state);
                }
            };

            if !enabled {
                return Ok(self.state);
            }
            self.transition(IntentState::Enabled).await;
        }

        if !self.state.fires_reminders() {
            return Ok(self.state);
        }

        let unbound = self.unbound();
        if unbound.is_empty() {
            self.execute().await?;
            return Ok(self.state);
        }

        self.transition(IntentState::Negotiating).await;
        if !self.hinted {
            self.hinted = true;
            let mut hints = soft_hints(&self.intent.enable);
            for action in &self.intent.actions {
                hints.extend(soft_hints(&action.when));
            }
            self.signal(NegotiatorSignal::Hints {
                session_id: self.id,
                intent: self.intent.name.clone(),
                hints,
                unbound: unbound.clone(),
            })
            .await;
        }

        self.fire_reminders(unbound).await?;
        Ok(self.state)
    }

    /// Drive the session to a terminal state, consuming negotiator updates
    /// whenever the anchor is incomplete.
    ///
    /// Between cycles the session sleeps until an update arrives or it is
    /// abandoned. A disabled session also wakes every
    /// [`ExecutorConfig::enable_poll_ms`], if set, so an `enable` predicate
    /// that turns true on its own is noticed without an update.
    pub async fn run(&mut self) -> Result<&ExecutionReport> {
        loop {
            let state = self.step().await?;
            if state.is_terminal() || state == IntentState::Executing {
                return match state {
                    IntentState::Succeeded => Ok(&self.report),
                    IntentState::Abandoned => Err(SessionError::Abandoned {
                        reason: self.abandon_reason(),
                    }),
                    _ => Err(SessionError::InvalidTransition {
                        state,
                        operation: "run",
                    }),
                };
            }

            let poll = match state {
                IntentState::Disabled => self.config.enable_poll(),
                _ => None,
            };
            let wake = tokio::select! {
                update = self.updates.recv() => Wake::Update(update),
                reason = abandoned(&mut self.abandon_rx) => Wake::Abandon(reason),
                _ = recheck(poll) => Wake::Recheck,
            };

            match wake {
                Wake::Update(Some(update)) => self.apply_update(update).await?,
                Wake::Update(None) => self.abandon("negotiator disconnected").await?,
                Wake::Abandon(reason) => self.finish_abandoned(reason).await,
                Wake::Recheck => debug!(session = %self.id, "Re-checking enable conditions"),
            }
        }
    }

    fn unbound(&self) -> Vec<UnboundSymbol> {
        self.intent
            .anchor
            .unbound_required(&self.anchor)
            .into_iter()
            .map(|symbol| UnboundSymbol {
                symbol: symbol.clone(),
                description: self
                    .intent
                    .anchor
                    .get(symbol)
                    .map(|spec| spec.description.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    async fn fire_reminders(&mut self, unbound: Vec<UnboundSymbol>) -> Result<()> {
        if self.intent.reminder.is_empty() {
            return Ok(());
        }
        if let Some(max) = self.config.max_reminder_cycles {
            if self.reminder_cycles >= max {
                return Ok(());
            }
        }

        let timeout = self.config.predicate_timeout();
        let fired = match interruptible(
            &mut self.abandon_rx,
            evaluate(&self.intent.reminder, &self.anchor, timeout),
        )
        .await
        {
            Ok(fired) => fired?,
            Err(reason) => {
                self.finish_abandoned(reason).await;
                return Ok(());
            }
        };

        if fired {
            self.reminder_cycles += 1;
            debug!(session = %self.id, cycle = self.reminder_cycles, "Reminder fired");
            self.report.record(
                ExecutionEventType::ReminderFired,
                json!({ "cycle": self.reminder_cycles }),
            );
            self.signal(NegotiatorSignal::Reminder {
                session_id: self.id,
                cycle: self.reminder_cycles,
                hints: soft_hints(&self.intent.reminder),
                unbound,
            })
            .await;
        }
        Ok(())
    }

    async fn execute(&mut self) -> Result<()> {
        self.transition(IntentState::Executing).await;

        let intent = Arc::clone(&self.intent);
        let timeout = self.config.predicate_timeout();

        // First match wins.
        let mut selected = None;
        for action in &intent.actions {
            let outcome = interruptible(
                &mut self.abandon_rx,
                evaluate(&action.when, &self.anchor, timeout),
            )
            .await;

            match outcome {
                Ok(Ok(true)) => {
                    selected = Some(action);
                    break;
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => return Err(self.fail(e.into()).await),
                Err(reason) => {
                    self.finish_abandoned(reason).await;
                    return Ok(());
                }
            }
        }

        let Some(action) = selected else {
            return Err(self
                .fail(SessionError::NoEligibleAction {
                    intent: intent.name.clone(),
                })
                .await);
        };

        info!(session = %self.id, intent = %intent.name, action = %action.name, "Selected action");
        self.report.action = Some(action.name.clone());
        self.report.category = Some(action.category);
        self.report.record(
            ExecutionEventType::ActionSelected,
            json!({ "action": action.name, "category": action.category }),
        );

        let limit = self.config.transform_timeout();
        let stream = FactStream::new(self.anchor.clone());
        let outcome = interruptible(
            &mut self.abandon_rx,
            tokio::time::timeout(limit, action.then.apply(self.anchor.clone(), stream)),
        )
        .await;

        let (anchor, stream) = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                self.report.record(
                    ExecutionEventType::TransformFailed,
                    json!({ "error": e.message }),
                );
                return Err(self
                    .fail(SessionError::TransformFailed {
                        action: action.name.clone(),
                        message: e.message,
                    })
                    .await);
            }
            Ok(Err(_)) => {
                let message = format!("timed out after {}ms", self.config.transform_timeout_ms);
                self.report.record(
                    ExecutionEventType::TransformFailed,
                    json!({ "error": message }),
                );
                return Err(self
                    .fail(SessionError::TransformFailed {
                        action: action.name.clone(),
                        message,
                    })
                    .await);
            }
            Err(reason) => {
                self.finish_abandoned(reason).await;
                return Ok(());
            }
        };

        self.anchor = anchor;
        self.report.record(
            ExecutionEventType::TransformCompleted,
            json!({ "facts": stream.facts.len() }),
        );

        // Structural checks come before any store write.
        if let Err(e) = stream.validate(self.registry.as_ref()) {
            warn!(session = %self.id, error = %e, "Fact stream rejected");
            self.report.record(
                ExecutionEventType::ValidationFailed,
                json!({ "error": e.to_string() }),
            );
            return Err(self.fail(e.into()).await);
        }

        let effects = match merge_stream(&stream) {
            Ok(effects) => effects,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Merge failed");
                self.report.record(
                    ExecutionEventType::MergeFailed,
                    json!({ "error": e.to_string() }),
                );
                return Err(self.fail(SessionError::Parley(e)).await);
            }
        };

        let abandon = self.abandon_rx.clone();
        let committed = commit(self.store.as_ref(), &effects, &self.config.commit, || {
            abandon.borrow().is_some()
        })
        .await;

        for entry in &committed.entities {
            match &entry.status {
                CommitStatus::Applied => self.report.record(
                    ExecutionEventType::EntityCommitted,
                    json!({ "entity": entry.entity.to_string(), "effect": entry.effect }),
                ),
                CommitStatus::Failed { error, .. } => self.report.record(
                    ExecutionEventType::EntityFailed,
                    json!({ "entity": entry.entity.to_string(), "error": error }),
                ),
                CommitStatus::NotAttempted => {}
            }
        }

        let applied = committed.applied().count();
        let failed = committed.failed().count();
        let complete = committed.is_complete();
        let cancelled = committed.cancelled;
        let reason = committed.first_error().unwrap_or_default().to_string();
        self.report.absorb(committed);

        if complete {
            info!(session = %self.id, entities = applied, "Intent succeeded");
            self.finish(Outcome::Succeeded).await;
            return Ok(());
        }

        if cancelled && failed == 0 {
            let reason = self.abandon_reason();
            self.finish_abandoned(reason).await;
            return Ok(());
        }

        Err(self
            .fail(SessionError::PartialCommit {
                applied,
                failed,
                reason,
            })
            .await)
    }

    async fn transition(&mut self, to: IntentState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;

        info!(session = %self.id, intent = %self.intent.name, %from, %to, "State changed");
        self.report.record(
            ExecutionEventType::StateChanged,
            json!({ "from": from, "to": to }),
        );
        self.signal(NegotiatorSignal::StateChanged {
            session_id: self.id,
            from,
            to,
        })
        .await;
    }

    async fn finish(&mut self, outcome: Outcome) {
        let to = match &outcome {
            Outcome::Succeeded => IntentState::Succeeded,
            Outcome::Failed { .. } => IntentState::Failed,
            Outcome::Abandoned { .. } => IntentState::Abandoned,
        };
        self.transition(to).await;

        self.report.anchor = self.anchor.clone();
        self.report.finish(outcome.clone());
        self.signal(NegotiatorSignal::Outcome {
            session_id: self.id,
            outcome,
        })
        .await;
    }

    async fn fail(&mut self, error: SessionError) -> SessionError {
        warn!(session = %self.id, intent = %self.intent.name, error = %error, "Intent failed");
        self.finish(Outcome::Failed {
            reason: error.to_string(),
        })
        .await;
        error
    }

    async fn finish_abandoned(&mut self, reason: String) {
        info!(session = %self.id, intent = %self.intent.name, reason = %reason, "Intent abandoned");
        self.report.record(
            ExecutionEventType::Abandoned,
            json!({ "reason": reason }),
        );
        self.finish(Outcome::Abandoned { reason }).await;
    }

    fn abandon_reason(&self) -> String {
        match &self.report.outcome {
            Some(Outcome::Abandoned { reason }) => reason.clone(),
            _ => self.abandon_rx.borrow().clone().unwrap_or_default(),
        }
    }

    /// Emit a signal. A full buffer waits for room unless the session is
    /// abandoned meanwhile, in which case the signal is dropped.
    async fn signal(&mut self, signal: NegotiatorSignal) {
        let signal = match self.signals.try_send(signal) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %self.id, "Negotiator gone, signal dropped");
                return;
            }
            Err(mpsc::error::TrySendError::Full(signal)) => signal,
        };

        match interruptible(&mut self.abandon_rx, self.signals.send(signal)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!(session = %self.id, "Negotiator gone, signal dropped"),
            Err(reason) => {
                warn!(session = %self.id, reason = %reason, "Negotiator not reading, signal dropped")
            }
        }
    }
}

/// Await `fut` unless the session is abandoned first, in which case the
/// abandonment reason is returned and `fut` is dropped.
async fn interruptible<F: Future>(
    abandon: &mut watch::Receiver<Option<String>>,
    fut: F,
) -> std::result::Result<F::Output, String> {
    let pending = abandon.borrow_and_update().clone();
    if let Some(reason) = pending {
        return Err(reason);
    }

    tokio::select! {
        output = fut => Ok(output),
        reason = abandoned(abandon) => Err(reason),
    }
}

async fn recheck(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

async fn abandoned(abandon: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if abandon.changed().await.is_err() {
            return std::future::pending().await;
        }
        let current = abandon.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{predicate, When};
    use crate::intent::{transform, Action, ActionCategory, Transform, TransformError};
    use async_trait::async_trait;
    use parley_core::{
        ElementDomain, EntityId, EvaluationError, Mutation, ParleyError, PropertyDescriptor,
        PropertyShape, ScalarOp, SequenceOp, StaticRegistry, StoreError, SymbolSpec,
        ValidationError,
    };
    use parley_merge::NetEffect;
    use parley_state::{InMemoryStore, StoredValue};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        items: Arc<PropertyDescriptor>,
        total: Arc<PropertyDescriptor>,
        registry: Arc<dyn DescriptorRegistry>,
        store: Arc<InMemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let items = PropertyDescriptor::builder("items", PropertyShape::Sequence)
                .anchor("order", SymbolSpec::required("the order").of_kind("order"))
                .element(ElementDomain::Text)
                .build()
                .unwrap();
            let total = PropertyDescriptor::builder("total", PropertyShape::Scalar)
                .anchor("order", SymbolSpec::required("the order").of_kind("order"))
                .element(ElementDomain::Integer)
                .build()
                .unwrap();
            let registry = StaticRegistry::new()
                .with(items.clone())
                .unwrap()
                .with(total.clone())
                .unwrap();

            Self {
                items,
                total,
                registry: Arc::new(registry),
                store: Arc::new(InMemoryStore::new()),
            }
        }

        fn session(
            &self,
            intent: Intent,
            anchor: Anchor,
        ) -> (
            IntentSession,
            mpsc::Sender<NegotiatorUpdate>,
            mpsc::Receiver<NegotiatorSignal>,
        ) {
            self.session_with(intent, anchor, self.store.clone(), ExecutorConfig::default())
        }

        fn session_with(
            &self,
            intent: Intent,
            anchor: Anchor,
            store: Arc<dyn PersistentStore>,
            config: ExecutorConfig,
        ) -> (
            IntentSession,
            mpsc::Sender<NegotiatorUpdate>,
            mpsc::Receiver<NegotiatorSignal>,
        ) {
            IntentSession::new(Arc::new(intent), anchor, self.registry.clone(), store, config)
        }

        /// Appends A, B and then C after A.
        fn add_items(&self) -> Arc<dyn Transform> {
            let items = self.items.clone();
            transform(move |anchor, stream| {
                let items = items.clone();
                async move {
                    let stream = stream
                        .with_property("items", &items)?
                        .fact(
                            "items",
                            Mutation::Sequence(SequenceOp::Append {
                                after: None,
                                values: vec![json!("A"), json!("B")],
                            }),
                        )?
                        .fact(
                            "items",
                            Mutation::Sequence(SequenceOp::Append {
                                after: Some(json!("A")),
                                values: vec![json!("C")],
                            }),
                        )?;
                    Ok((anchor, stream))
                }
            })
        }

        fn items_key(&self, order: &str) -> parley_core::EntityKey {
            parley_core::EntityKey::new(
                "items",
                Anchor::new().with("order", EntityId::new("order", order)),
            )
        }
    }

    fn order(id: &str) -> Anchor {
        Anchor::new().with("order", EntityId::new("order", id))
    }

    fn noop() -> Arc<dyn Transform> {
        transform(|anchor, stream| async move { Ok((anchor, stream)) })
    }

    fn constant(value: bool) -> When {
        When::hard(predicate(move |_| async move { Ok(value) }))
    }

    fn order_intent(then: Arc<dyn Transform>) -> Intent {
        Intent::builder("order_items")
            .purpose("Add items to an order")
            .symbol("order", SymbolSpec::required("Which order?").of_kind("order"))
            .reminder(When::soft("Ask the customer which order to change"))
            .action(Action::new("add", ActionCategory::Update, then))
            .build()
            .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<NegotiatorSignal>) -> Vec<NegotiatorSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let fixture = Fixture::new();
        let intent = Intent::builder("pick")
            .action(Action::new("first", ActionCategory::Get, noop()).when(constant(true)))
            .action(Action::new("second", ActionCategory::Get, noop()).when(constant(false)))
            .action(Action::new("third", ActionCategory::Get, noop()).when(constant(true)))
            .build()
            .unwrap();
        let (mut session, _updates, _signals) = fixture.session(intent, Anchor::new());

        let state = session.step().await.unwrap();

        assert_eq!(state, IntentState::Succeeded);
        assert_eq!(session.report().action.as_deref(), Some("first"));
        assert_eq!(session.report().category, Some(ActionCategory::Get));
    }

    #[tokio::test]
    async fn test_disabled_stays_disabled() {
        let fixture = Fixture::new();
        let intent = Intent::builder("gated")
            .symbol("order", SymbolSpec::required("Which order?"))
            .enable(constant(false))
            .reminder(When::soft("nudge"))
            .action(Action::new("go", ActionCategory::Show, noop()))
            .build()
            .unwrap();
        let (mut session, _updates, mut signals) = fixture.session(intent, Anchor::new());

        for _ in 0..3 {
            assert_eq!(session.step().await.unwrap(), IntentState::Disabled);
        }

        assert_eq!(session.reminder_cycles(), 0);
        assert!(drain(&mut signals).is_empty());
    }

    #[tokio::test]
    async fn test_negotiation_signals() {
        let fixture = Fixture::new();
        let (mut session, _updates, mut signals) =
            fixture.session(order_intent(noop()), Anchor::new());

        assert_eq!(session.step().await.unwrap(), IntentState::Negotiating);

        let signals = drain(&mut signals);
        assert!(matches!(
            signals[0],
            NegotiatorSignal::StateChanged {
                to: IntentState::Enabled,
                ..
            }
        ));
        assert!(matches!(
            signals[1],
            NegotiatorSignal::StateChanged {
                to: IntentState::Negotiating,
                ..
            }
        ));
        match &signals[2] {
            NegotiatorSignal::Hints { unbound, .. } => {
                assert_eq!(unbound[0].symbol.as_str(), "order");
                assert_eq!(unbound[0].description, "Which order?");
            }
            other => panic!("expected hints, got {:?}", other),
        }
        assert!(matches!(
            signals[3],
            NegotiatorSignal::Reminder { cycle: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_reminders_repeat_up_to_cap() {
        let fixture = Fixture::new();
        let config = ExecutorConfig {
            max_reminder_cycles: Some(2),
            ..Default::default()
        };
        let (mut session, _updates, _signals) = fixture.session_with(
            order_intent(noop()),
            Anchor::new(),
            fixture.store.clone(),
            config,
        );

        for _ in 0..4 {
            session.step().await.unwrap();
        }

        assert_eq!(session.state(), IntentState::Negotiating);
        assert_eq!(session.reminder_cycles(), 2);
    }

    #[tokio::test]
    async fn test_run_binds_then_commits() {
        let fixture = Fixture::new();
        let (mut session, updates, _signals) =
            fixture.session(order_intent(fixture.add_items()), Anchor::new());

        updates
            .send(NegotiatorUpdate::Bind { bindings: order("42") })
            .await
            .unwrap();

        let report = session.run().await.unwrap();

        assert_eq!(report.outcome, Some(Outcome::Succeeded));
        assert_eq!(report.commits.len(), 1);
        assert_eq!(report.anchor, order("42"));
        assert_eq!(
            fixture.store.get(&fixture.items_key("42")).await,
            StoredValue::Sequence(vec![json!("A"), json!("C"), json!("B")])
        );
    }

    #[tokio::test]
    async fn test_bind_rejects_undeclared_and_mistyped_symbols() {
        let fixture = Fixture::new();
        let (mut session, _updates, _signals) =
            fixture.session(order_intent(noop()), Anchor::new());

        let unknown = session.bind(Anchor::new().with("customer", EntityId::new("customer", "1")));
        assert!(matches!(unknown, Err(SessionError::UnknownSymbol { .. })));

        let mistyped = session.bind(Anchor::new().with("order", EntityId::new("sku", "1")));
        assert!(matches!(
            mistyped,
            Err(SessionError::Parley(ParleyError::Bind(
                BindError::AnchorTypeMismatch { .. }
            )))
        ));
        assert!(session.anchor().is_empty());
    }

    #[tokio::test]
    async fn test_no_eligible_action() {
        let fixture = Fixture::new();
        let intent = Intent::builder("stuck")
            .action(Action::new("never", ActionCategory::Get, noop()).when(constant(false)))
            .build()
            .unwrap();
        let (mut session, _updates, _signals) = fixture.session(intent, Anchor::new());

        let result = session.step().await;

        assert!(matches!(result, Err(SessionError::NoEligibleAction { .. })));
        assert_eq!(session.state(), IntentState::Failed);
    }

    #[tokio::test]
    async fn test_evaluation_error_propagates() {
        let fixture = Fixture::new();
        let broken = When::hard(predicate(|_| async {
            Err(EvaluationError::PredicateFailed {
                message: "inventory service down".into(),
            })
        }));
        let intent = Intent::builder("check")
            .action(Action::new("check", ActionCategory::Get, noop()).when(broken))
            .build()
            .unwrap();
        let (mut session, _updates, _signals) = fixture.session(intent, Anchor::new());

        let result = session.step().await;

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            SessionError::Parley(ParleyError::Evaluation(_))
        ));
        assert!(error.is_recoverable());
        assert_eq!(session.state(), IntentState::Failed);
    }

    #[tokio::test]
    async fn test_transform_failure() {
        let fixture = Fixture::new();
        let failing = transform(|_, _| async { Err(TransformError::new("out of stock")) });
        let (mut session, _updates, _signals) =
            fixture.session(order_intent(failing), order("42"));

        let result = session.step().await;

        assert!(matches!(result, Err(SessionError::TransformFailed { .. })));
        assert_eq!(
            session.report().outcome,
            Some(Outcome::Failed {
                reason: "Action 'add' failed: out of stock".into()
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_stream_leaves_store_untouched() {
        let fixture = Fixture::new();
        let unregistered = PropertyDescriptor::builder("ghost", PropertyShape::Scalar)
            .anchor("order", SymbolSpec::required("the order"))
            .build()
            .unwrap();
        let items = fixture.items.clone();
        let then = transform(move |anchor, stream| {
            let items = items.clone();
            let ghost = unregistered.clone();
            async move {
                let stream = stream
                    .with_property("items", &items)?
                    .with_property("ghost", &ghost)?
                    .fact(
                        "items",
                        Mutation::Sequence(SequenceOp::Assign(vec![json!("A")])),
                    )?
                    .fact("ghost", Mutation::Scalar(ScalarOp::Assign(json!(1))))?;
                Ok((anchor, stream))
            }
        });
        let (mut session, _updates, _signals) = fixture.session(order_intent(then), order("42"));

        let result = session.step().await;

        assert!(matches!(
            result,
            Err(SessionError::Parley(ParleyError::Validation(
                ValidationError::UnregisteredDescriptor { .. }
            )))
        ));
        assert_eq!(fixture.store.version().await, 0);
        assert!(session
            .report()
            .events(&ExecutionEventType::ValidationFailed)
            .next()
            .is_some());
    }

    /// Fails every write to the `total` descriptor.
    struct FailingStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl PersistentStore for FailingStore {
        async fn apply_net_effect(
            &self,
            entity: &parley_core::BoundEntity,
            effect: &NetEffect,
        ) -> std::result::Result<(), StoreError> {
            if entity.name() == "total" {
                return Err(StoreError::Backend("constraint violated".into()));
            }
            self.inner.apply_net_effect(entity, effect).await
        }

        async fn read_current_value(
            &self,
            entity: &parley_core::BoundEntity,
        ) -> std::result::Result<StoredValue, StoreError> {
            self.inner.read_current_value(entity).await
        }
    }

    #[tokio::test]
    async fn test_partial_commit_is_reported() {
        let fixture = Fixture::new();
        let items = fixture.items.clone();
        let total = fixture.total.clone();
        let then = transform(move |anchor, stream| {
            let items = items.clone();
            let total = total.clone();
            async move {
                let stream = stream
                    .with_property("items", &items)?
                    .with_property("total", &total)?
                    .fact(
                        "items",
                        Mutation::Sequence(SequenceOp::Assign(vec![json!("A")])),
                    )?
                    .fact("total", Mutation::Scalar(ScalarOp::Assign(json!(3))))?;
                Ok((anchor, stream))
            }
        });
        let store = Arc::new(FailingStore {
            inner: InMemoryStore::new(),
        });
        let (mut session, _updates, _signals) = fixture.session_with(
            order_intent(then),
            order("42"),
            store.clone(),
            ExecutorConfig::default(),
        );

        let result = session.step().await;

        assert!(matches!(
            result,
            Err(SessionError::PartialCommit {
                applied: 1,
                failed: 1,
                ..
            })
        ));
        let report = session.report();
        assert_eq!(report.commits[0].status, CommitStatus::Applied);
        assert!(matches!(
            report.commits[1].status,
            CommitStatus::Failed { .. }
        ));
        assert_eq!(
            store.inner.get(&fixture.items_key("42")).await,
            StoredValue::Sequence(vec![json!("A")])
        );
    }

    #[tokio::test]
    async fn test_abandon_while_negotiating() {
        let fixture = Fixture::new();
        let (mut session, _updates, _signals) =
            fixture.session(order_intent(noop()), Anchor::new());
        session.step().await.unwrap();

        session
            .apply_update(NegotiatorUpdate::Abandon {
                reason: "topic changed".into(),
            })
            .await
            .unwrap();

        assert_eq!(session.state(), IntentState::Abandoned);
        assert_eq!(
            session.report().outcome,
            Some(Outcome::Abandoned {
                reason: "topic changed".into()
            })
        );
        assert!(matches!(
            session.bind(order("1")),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_abandon_interrupts_transform() {
        let fixture = Fixture::new();
        let items = fixture.items.clone();
        let slow = transform(move |anchor, stream| {
            let items = items.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let stream = stream.with_property("items", &items)?.fact(
                    "items",
                    Mutation::Sequence(SequenceOp::Clear),
                )?;
                Ok((anchor, stream))
            }
        });
        let (mut session, _updates, _signals) = fixture.session(order_intent(slow), order("42"));

        let handle = session.abandon_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abandon("user left");
        });

        assert_eq!(session.step().await.unwrap(), IntentState::Abandoned);
        assert_eq!(fixture.store.version().await, 0);
    }

    #[tokio::test]
    async fn test_abandon_interrupts_pending_predicate() {
        let fixture = Fixture::new();
        let stalled = When::hard(predicate(|_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(true)
        }));
        let intent = Intent::builder("check_stock")
            .action(Action::new("check", ActionCategory::Get, fixture.add_items()).when(stalled))
            .build()
            .unwrap();
        let (mut session, _updates, _signals) = fixture.session(intent, order("42"));

        let handle = session.abandon_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abandon("customer changed topic");
        });

        assert_eq!(session.step().await.unwrap(), IntentState::Abandoned);
        assert_eq!(session.report().action, None);
        assert_eq!(
            session.report().outcome,
            Some(Outcome::Abandoned {
                reason: "customer changed topic".into()
            })
        );
        assert_eq!(fixture.store.version().await, 0);
    }

    /// Abandons the session as soon as its first entity is written.
    struct AbandoningStore {
        inner: InMemoryStore,
        handle: std::sync::Mutex<Option<AbandonHandle>>,
    }

    #[async_trait]
    impl PersistentStore for AbandoningStore {
        async fn apply_net_effect(
            &self,
            entity: &parley_core::BoundEntity,
            effect: &NetEffect,
        ) -> std::result::Result<(), StoreError> {
            self.inner.apply_net_effect(entity, effect).await?;
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.abandon("customer hung up");
            }
            Ok(())
        }

        async fn read_current_value(
            &self,
            entity: &parley_core::BoundEntity,
        ) -> std::result::Result<StoredValue, StoreError> {
            self.inner.read_current_value(entity).await
        }
    }

    #[tokio::test]
    async fn test_abandon_during_commit_keeps_applied_entities() {
        let fixture = Fixture::new();
        let items = fixture.items.clone();
        let total = fixture.total.clone();
        let then = transform(move |anchor, stream| {
            let items = items.clone();
            let total = total.clone();
            async move {
                let stream = stream
                    .with_property("items", &items)?
                    .with_property("total", &total)?
                    .fact(
                        "items",
                        Mutation::Sequence(SequenceOp::Assign(vec![json!("A")])),
                    )?
                    .fact("total", Mutation::Scalar(ScalarOp::Assign(json!(3))))?;
                Ok((anchor, stream))
            }
        });
        let store = Arc::new(AbandoningStore {
            inner: InMemoryStore::new(),
            handle: std::sync::Mutex::new(None),
        });
        let (mut session, _updates, _signals) = fixture.session_with(
            order_intent(then),
            order("42"),
            store.clone(),
            ExecutorConfig::default(),
        );
        *store.handle.lock().unwrap() = Some(session.abandon_handle());

        assert_eq!(session.step().await.unwrap(), IntentState::Abandoned);

        let report = session.report();
        assert_eq!(report.commits.len(), 2);
        assert_eq!(report.commits[0].status, CommitStatus::Applied);
        assert_eq!(report.commits[1].status, CommitStatus::NotAttempted);
        assert_eq!(
            report.outcome,
            Some(Outcome::Abandoned {
                reason: "customer hung up".into()
            })
        );
        assert_eq!(
            store.inner.get(&fixture.items_key("42")).await,
            StoredValue::Sequence(vec![json!("A")])
        );
        let total_key = parley_core::EntityKey::new("total", order("42"));
        assert_eq!(store.inner.get(&total_key).await, StoredValue::Unset);
    }

    #[tokio::test]
    async fn test_abandon_while_negotiator_stops_reading() {
        let fixture = Fixture::new();
        let config = ExecutorConfig {
            signal_buffer: 2,
            ..Default::default()
        };
        // Signals are never drained, so the buffer fills during the first step.
        let (mut session, _updates, _signals) = fixture.session_with(
            order_intent(noop()),
            Anchor::new(),
            fixture.store.clone(),
            config,
        );

        let handle = session.abandon_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abandon("moved on");
        });

        let finished = tokio::time::timeout(Duration::from_secs(2), async {
            for _ in 0..10 {
                if session.step().await.unwrap().is_terminal() {
                    break;
                }
            }
        })
        .await;

        assert!(finished.is_ok());
        assert_eq!(session.state(), IntentState::Abandoned);
        assert_eq!(
            session.report().outcome,
            Some(Outcome::Abandoned {
                reason: "moved on".into()
            })
        );
    }

    #[tokio::test]
    async fn test_run_rechecks_enable_while_disabled() {
        let fixture = Fixture::new();
        let open = Arc::new(AtomicBool::new(false));
        let gate = open.clone();
        let intent = Intent::builder("after_hours")
            .symbol("order", SymbolSpec::required("Which order?").of_kind("order"))
            .enable(When::hard(predicate(move |_| {
                let gate = gate.clone();
                async move { Ok(gate.load(Ordering::SeqCst)) }
            })))
            .action(Action::new("add", ActionCategory::Update, fixture.add_items()))
            .build()
            .unwrap();
        let config = ExecutorConfig {
            enable_poll_ms: Some(10),
            ..Default::default()
        };
        let (mut session, _updates, _signals) =
            fixture.session_with(intent, order("42"), fixture.store.clone(), config);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            open.store(true, Ordering::SeqCst);
        });

        let report = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .unwrap()
            .unwrap();

        assert!(report.outcome.as_ref().is_some_and(Outcome::is_success));
        assert!(report.duration_ms().is_some());
        assert_eq!(
            fixture.store.get(&fixture.items_key("42")).await,
            StoredValue::Sequence(vec![json!("A"), json!("C"), json!("B")])
        );
    }

    #[tokio::test]
    async fn test_run_abandons_when_negotiator_disconnects() {
        let fixture = Fixture::new();
        let (mut session, updates, _signals) =
            fixture.session(order_intent(noop()), Anchor::new());
        drop(updates);

        let result = session.run().await;

        assert!(matches!(result, Err(SessionError::Abandoned { .. })));
    }
}
