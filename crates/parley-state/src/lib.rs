//! # Parley State
//!
//! The persistent store boundary and entity-scoped commit of net effects.

pub mod commit;
pub mod store;

pub use commit::{commit, CommitOptions, CommitReport, CommitStatus, EntityCommit};
pub use store::{apply_effect, InMemoryStore, PersistentStore, StoredEntry, StoredValue};
