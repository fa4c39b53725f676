//! A scripted negotiator standing in for the conversational layer.

use std::collections::VecDeque;

use parley_core::Anchor;
use parley_negotiate::{NegotiatorSignal, NegotiatorUpdate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Answers the opening prompt with the next scripted binding, or abandons
/// when the script is empty.
pub struct ScriptedNegotiator {
    name: String,
    answers: VecDeque<Anchor>,
}

impl ScriptedNegotiator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            answers: VecDeque::new(),
        }
    }

    pub fn answer(mut self, bindings: Anchor) -> Self {
        self.answers.push_back(bindings);
        self
    }

    /// Consume signals until the session reports an outcome.
    pub fn spawn(
        mut self,
        updates: mpsc::Sender<NegotiatorUpdate>,
        signals: mpsc::Receiver<NegotiatorSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut signals = ReceiverStream::new(signals);

            while let Some(signal) = signals.next().await {
                let reply = match signal {
                    NegotiatorSignal::Hints { hints, unbound, .. } => {
                        for hint in &hints {
                            info!(negotiator = %self.name, "💬 {}", hint);
                        }
                        for symbol in &unbound {
                            info!(negotiator = %self.name, symbol = %symbol.symbol, "❓ {}", symbol.description);
                        }
                        Some(self.next_update())
                    }
                    NegotiatorSignal::Reminder { cycle, hints, .. } => {
                        info!(negotiator = %self.name, cycle, "🔔 {}", hints.join("; "));
                        None
                    }
                    NegotiatorSignal::StateChanged { from, to, .. } => {
                        debug!(negotiator = %self.name, %from, %to, "Session state changed");
                        None
                    }
                    NegotiatorSignal::Outcome { outcome, .. } => {
                        info!(negotiator = %self.name, ?outcome, "Session finished");
                        break;
                    }
                };

                if let Some(update) = reply {
                    if updates.send(update).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn next_update(&mut self) -> NegotiatorUpdate {
        match self.answers.pop_front() {
            Some(bindings) => {
                info!(negotiator = %self.name, bindings = %bindings, "Answering");
                NegotiatorUpdate::Bind { bindings }
            }
            None => NegotiatorUpdate::Abandon {
                reason: "customer stopped answering".to_string(),
            },
        }
    }
}
