//! Offline-first sync core for a personal library tracker.
//!
//! Reads are served from a durable cache with bounded staleness and
//! deduplicated while in flight; writes made without connectivity are
//! queued durably and replayed in order once the API is reachable again.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod sync;

#[cfg(test)]
mod testing;

pub use api::{LibraryClient, RequestGateway};
pub use cache::PersistentCache;
pub use config::Config;
pub use error::{ApiError, QueueError};
pub use event::{StatusSnapshot, StatusStore, SyncEvent, SyncReport};
pub use sync::{ConnectivityMonitor, MutationOp, MutationQueue, QueueOutcome, SyncWorker};
