//! Asynchronous persistence path.
//!
//! The processing context never waits on durable storage: it enqueues
//! [`PersistenceTask`]s on a single-producer/single-consumer queue and a
//! dedicated worker applies them to the [`DurableStore`]. The in-memory
//! [`crate::matching::EmbeddingStore`] stays authoritative; a dropped task is
//! an eventual-consistency gap on the next restart, not a correctness
//! failure.

pub mod queue;
pub mod task;

pub use queue::{DurableStore, PersistenceConfig, PersistenceHandle, PersistenceQueue};
pub use task::PersistenceTask;
