//! Offline write capture and replay.
//!
//! Writes that must tolerate being offline go through
//! [`MutationQueue::queue_or_execute`]. Captured writes are persisted in
//! FIFO order and replayed through the same client as live writes, so both
//! share one invalidation path.

mod monitor;
mod mutation;
mod queue;
mod store;
mod worker;

pub use monitor::ConnectivityMonitor;
pub use mutation::{Mutation, MutationOp};
pub use queue::{MutationQueue, QueueOutcome, MAX_REPLAY_ATTEMPTS};
pub use store::{Claim, MutationStore, SqliteMutationStore};
pub use worker::{SyncRequester, SyncWorker};
