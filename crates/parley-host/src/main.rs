//! # Parley Host
//!
//! Reference hosting agent: installs the descriptor registry, then drives a
//! few intent sessions against an in-memory store with scripted negotiators.

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use parley_core::{Anchor, DescriptorRegistry, EntityId, StaticRegistry};
use parley_negotiate::{Catalog, ExecutorConfig, IntentSession};
use parley_state::{InMemoryStore, PersistentStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod catalog;
mod negotiator;

use catalog::OrderSchema;
use negotiator::ScriptedNegotiator;

/// Read the executor configuration from `PARLEY_CONFIG`, if set.
fn load_config() -> anyhow::Result<ExecutorConfig> {
    let Ok(path) = std::env::var("PARLEY_CONFIG") else {
        return Ok(ExecutorConfig::default());
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path))?;
    info!(path = %path, "Loaded configuration");
    Ok(config)
}

/// Run one intent to completion and log its report.
async fn converse(
    catalog: &Catalog,
    intent: &str,
    negotiator: ScriptedNegotiator,
    registry: Arc<dyn DescriptorRegistry>,
    store: Arc<dyn PersistentStore>,
    config: ExecutorConfig,
) -> anyhow::Result<()> {
    let intent = catalog
        .find(intent)
        .with_context(|| format!("no intent named {}", intent))?;

    let (mut session, updates, signals) =
        IntentSession::new(intent, Anchor::new(), registry, store, config);
    let negotiation = negotiator.spawn(updates, signals);

    match session.run().await {
        Ok(report) => info!(
            session = %report.session_id,
            action = ?report.action,
            entities = report.commits.len(),
            "✅ Intent succeeded"
        ),
        Err(e) if e.is_recoverable() => warn!(error = %e, "Intent failed, retry possible"),
        Err(e) => error!(error = %e, "Intent failed"),
    }

    let report = session.into_report();
    info!(
        intent = %report.intent,
        success = report.outcome.as_ref().is_some_and(|o| o.is_success()),
        duration_ms = ?report.duration_ms(),
        "Session report"
    );
    info!("{}", serde_json::to_string_pretty(&report)?);

    negotiation.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Parley host starting...");

    let config = load_config()?;
    let schema = OrderSchema::new()?;
    let registry: &'static StaticRegistry = schema.registry()?.install_global()?;
    let registry: Arc<dyn DescriptorRegistry> = Arc::new(registry);
    let catalog = schema.catalog()?;
    let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());

    let order = |id: &str| Anchor::new().with("order", EntityId::new("order", id));

    // Independent conversations run concurrently.
    let conversations = vec![
        converse(
            &catalog,
            "add_items",
            ScriptedNegotiator::new("alice").answer(order("42")),
            registry.clone(),
            store.clone(),
            config.clone(),
        ),
        converse(
            &catalog,
            "add_items",
            ScriptedNegotiator::new("bob").answer(order("closed-7")),
            registry.clone(),
            store.clone(),
            config.clone(),
        ),
        converse(
            &catalog,
            "clear_order",
            ScriptedNegotiator::new("carol"),
            registry.clone(),
            store.clone(),
            config.clone(),
        ),
    ];

    for result in join_all(conversations).await {
        if let Err(e) = result {
            error!(error = %e, "Conversation aborted");
        }
    }

    info!("👋 Parley host finished");
    Ok(())
}
