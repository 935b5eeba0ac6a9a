//! Durable, ordered, retry-bounded queue of writes made while offline.

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::mutation::{Mutation, MutationOp};
use super::store::{Claim, MutationStore};
use crate::api::LibraryClient;
use crate::clock::Clock;
use crate::error::{ApiError, QueueError};
use crate::event::{StatusStore, SyncEvent, SyncReport};

/// Replays a mutation gets before it is dropped.
pub const MAX_REPLAY_ATTEMPTS: u32 = 3;

/// Result of a write that tolerates being offline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome<T> {
  /// The write reached the server
  Executed(T),
  /// The device was offline; the write waits in the queue
  Queued { id: i64 },
}

impl<T> QueueOutcome<T> {
  pub fn is_queued(&self) -> bool {
    matches!(self, QueueOutcome::Queued { .. })
  }
}

static NEXT_QUEUE: AtomicU64 = AtomicU64::new(0);

/// Resets the in-progress flag when a pass ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Process-wide mutation queue; share it behind an `Arc`.
pub struct MutationQueue {
  store: Arc<dyn MutationStore>,
  client: LibraryClient,
  status: StatusStore,
  clock: Arc<dyn Clock>,
  syncing: AtomicBool,
  /// Claim token, unique per queue across processes sharing the store
  owner: String,
}

impl MutationQueue {
  pub fn new(
    store: Arc<dyn MutationStore>,
    client: LibraryClient,
    status: StatusStore,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let queue = Self {
      store,
      client,
      status,
      clock,
      syncing: AtomicBool::new(false),
      owner: format!(
        "{}-{}",
        std::process::id(),
        NEXT_QUEUE.fetch_add(1, Ordering::Relaxed)
      ),
    };
    queue.refresh_pending();
    queue
  }

  /// Append a write at the tail; returns its id.
  pub fn enqueue(&self, op: &MutationOp) -> Result<i64, QueueError> {
    let id = self
      .store
      .insert(op.kind(), &op.payload(), self.clock.now())
      .map_err(QueueError::storage)?;

    info!(id, kind = op.kind(), "Queued mutation");
    self.refresh_pending();
    self.status.emit(SyncEvent::MutationQueued {
      id,
      kind: op.kind().to_string(),
    });
    Ok(id)
  }

  /// Every queued mutation in replay order. Empty if the store is unreadable.
  pub fn get_all(&self) -> Vec<Mutation> {
    self.store.list().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to read mutation queue");
      Vec::new()
    })
  }

  pub fn remove(&self, id: i64) {
    if let Err(e) = self.store.delete(id) {
      warn!(id, error = %e, "Failed to remove mutation");
    }
    self.refresh_pending();
  }

  /// Discard every pending write.
  pub fn clear(&self) {
    if let Err(e) = self.store.clear() {
      warn!(error = %e, "Failed to clear mutation queue");
    }
    self.refresh_pending();
  }

  pub fn pending_count(&self) -> usize {
    self.status.pending_count()
  }

  /// Replay the queue in FIFO order.
  ///
  /// Returns an empty report without touching the queue when offline or when
  /// another pass is already running. Each row is claimed in the store before
  /// it is sent, so queues in other processes never replay the same row.
  pub async fn sync(&self) -> SyncReport {
    if !self.status.is_online() {
      debug!("Offline, skipping sync");
      return SyncReport::default();
    }
    if self
      .syncing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("Sync already in progress");
      return SyncReport::default();
    }
    let _guard = SyncGuard(&self.syncing);

    let mutations = self.get_all();
    if mutations.is_empty() {
      return SyncReport::default();
    }

    info!(pending = mutations.len(), "Replaying queued mutations");
    self.status.emit(SyncEvent::SyncStarted);

    let mut report = SyncReport::default();
    for mutation in mutations {
      let attempt = match self.store.claim(mutation.id, &self.owner, self.clock.now()) {
        Ok(Claim::Acquired { attempt }) => attempt,
        Ok(Claim::Gone) => continue,
        Ok(Claim::Held) => {
          debug!(id = mutation.id, "Mutation claimed by another replayer");
          break;
        }
        Err(e) => {
          warn!(id = mutation.id, error = %e, "Failed to claim mutation");
          break;
        }
      };
      let mutation = Mutation { attempt, ..mutation };
      if !self.replay(&mutation, &mut report).await {
        break;
      }
    }

    self.refresh_pending();
    info!(synced = report.synced, failed = report.failed, "Sync pass finished");
    if report.failed > 0 {
      self.status.emit(SyncEvent::SyncFailed(report));
    } else {
      self.status.emit(SyncEvent::SyncCompleted(report));
    }
    report
  }

  /// Replay one mutation. Returns whether the pass may continue.
  async fn replay(&self, mutation: &Mutation, report: &mut SyncReport) -> bool {
    let op = match mutation.op() {
      Ok(op) => op,
      Err(e) => {
        warn!(
          id = mutation.id,
          kind = %mutation.kind,
          error = %e,
          "Dropping unreadable mutation"
        );
        self.drop_mutation(mutation.id);
        report.failed += 1;
        return true;
      }
    };

    match self.client.execute(&op).await {
      Ok(_) => {
        debug!(id = mutation.id, kind = %mutation.kind, "Replayed mutation");
        self.drop_mutation(mutation.id);
        report.synced += 1;
        true
      }
      Err(ApiError::Unauthorized) => {
        warn!(id = mutation.id, "Replay unauthorized, stopping until signed in");
        if let Err(e) = self.store.release(mutation.id, &self.owner) {
          warn!(id = mutation.id, error = %e, "Failed to release mutation");
        }
        false
      }
      Err(e) if e.is_connectivity() => {
        let attempt = mutation.attempt + 1;
        if attempt >= MAX_REPLAY_ATTEMPTS {
          warn!(
            id = mutation.id,
            kind = %mutation.kind,
            attempts = attempt,
            "Giving up on mutation"
          );
          self.drop_mutation(mutation.id);
          report.failed += 1;
        } else {
          info!(id = mutation.id, attempt, error = %e, "Replay failed, will retry");
          if let Err(e) = self.store.set_attempt(mutation.id, attempt) {
            warn!(id = mutation.id, error = %e, "Failed to record replay attempt");
          }
        }
        // Later writes may depend on this one
        false
      }
      Err(e) => {
        warn!(
          id = mutation.id,
          kind = %mutation.kind,
          error = %e,
          "Mutation rejected, dropping"
        );
        self.drop_mutation(mutation.id);
        report.failed += 1;
        true
      }
    }
  }

  /// Run `attempt` now if online, else queue `op` for replay.
  ///
  /// A connectivity failure of the live attempt also queues `op`, and the
  /// failure is still returned so the caller can show "saved for later".
  pub async fn queue_or_execute<T, F, Fut>(
    &self,
    op: MutationOp,
    attempt: F,
  ) -> Result<QueueOutcome<T>, QueueError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    if !self.status.is_online() {
      let id = self.enqueue(&op)?;
      return Ok(QueueOutcome::Queued { id });
    }

    match attempt().await {
      Ok(value) => Ok(QueueOutcome::Executed(value)),
      Err(e) if e.is_connectivity() => {
        info!(kind = op.kind(), error = %e, "Write failed to reach server, queueing");
        self.enqueue(&op)?;
        Err(QueueError::Api(e))
      }
      Err(e) => Err(QueueError::Api(e)),
    }
  }

  /// `queue_or_execute` with the op's own write as the live attempt.
  pub async fn submit(&self, op: MutationOp) -> Result<QueueOutcome<Value>, QueueError> {
    let client = self.client.clone();
    let live = op.clone();
    self
      .queue_or_execute(op, move || async move { client.execute(&live).await })
      .await
  }

  fn drop_mutation(&self, id: i64) {
    if let Err(e) = self.store.delete(id) {
      warn!(id, error = %e, "Failed to remove mutation");
    }
  }

  fn refresh_pending(&self) {
    match self.store.count() {
      Ok(count) => self.status.set_pending(count),
      Err(e) => warn!(error = %e, "Failed to count pending mutations"),
    }
  }
}
