//! Versioned response cache.
//!
//! This module provides the storage side of the agent:
//! - Named stores, one per generation, mapping request identity to a response snapshot
//! - A SQLite backend for persistence and an in-memory backend for ephemeral runs
//! - `Caches`/`Store` handles the rest of the crate works through

mod storage;
mod store;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::{Caches, Store};
pub use traits::{RequestKey, StoredResponse};
