//! Persistent read cache.
//!
//! This module provides a durable key-value cache of request results:
//! - One entry per key, last write wins, no merging
//! - Exact and prefix invalidation for families of list results
//! - A periodic sweep of entries past their expiry
//! - Best-effort semantics: storage failures surface as misses, never errors

mod persistent;
mod storage;
mod traits;

pub use persistent::PersistentCache;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheStats};
