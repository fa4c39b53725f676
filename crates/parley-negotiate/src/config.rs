//! Executor configuration.

use std::time::Duration;

use parley_state::CommitOptions;
use serde::{Deserialize, Serialize};

/// Configuration for intent sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for one hard predicate, in milliseconds.
    pub predicate_timeout_ms: u64,

    /// Upper bound for one `then` transform, in milliseconds.
    pub transform_timeout_ms: u64,

    /// How many times reminders may fire per session. `None` is unbounded.
    pub max_reminder_cycles: Option<u32>,

    /// Capacity of the signal and update channels.
    pub signal_buffer: usize,

    /// While disabled, re-check `enable` this often even without updates.
    /// `None` waits for the next negotiator update.
    pub enable_poll_ms: Option<u64>,

    pub commit: CommitOptions,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            predicate_timeout_ms: 5_000,
            transform_timeout_ms: 30_000,
            max_reminder_cycles: None,
            signal_buffer: 64,
            enable_poll_ms: None,
            commit: CommitOptions::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn predicate_timeout(&self) -> Duration {
        Duration::from_millis(self.predicate_timeout_ms)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    pub fn enable_poll(&self) -> Option<Duration> {
        self.enable_poll_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{ "max_reminder_cycles": 3, "commit": { "prefer_batch": true } }"#)
                .unwrap();

        assert_eq!(config.max_reminder_cycles, Some(3));
        assert_eq!(config.predicate_timeout_ms, 5_000);
        assert!(config.commit.prefer_batch);
        assert!(config.commit.stop_on_failure);
        assert_eq!(config.enable_poll(), None);
    }
}
