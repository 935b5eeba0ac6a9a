//! Observable sync status and events.
//!
//! UI-level observers read "is online" and "pending count" from watch
//! channels and receive transitions from a broadcast channel. A subscription
//! is its receiver; dropping it unsubscribes.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Capacity of the event channel; slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Aggregate outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub synced: usize,
  pub failed: usize,
}

impl SyncReport {
  pub fn is_empty(&self) -> bool {
    self.synced == 0 && self.failed == 0
  }

  /// Short notification text for the pass, if anything happened.
  pub fn summary(&self) -> Option<String> {
    if self.is_empty() {
      None
    } else if self.failed > 0 {
      Some(format!(
        "Sync: {} succeeded, {} failed",
        self.synced, self.failed
      ))
    } else {
      Some(format!("Synced {} changes", self.synced))
    }
  }
}

/// Sync subsystem events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  Online,
  Offline,
  SyncStarted,
  /// Pass finished with no dropped mutations
  SyncCompleted(SyncReport),
  /// Pass finished and at least one mutation was dropped
  SyncFailed(SyncReport),
  /// A write was captured for later replay
  MutationQueued { id: i64, kind: String },
  /// The server answered 401
  AuthError,
}

impl fmt::Display for SyncEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncEvent::Online => write!(f, "online"),
      SyncEvent::Offline => write!(f, "offline"),
      SyncEvent::SyncStarted => write!(f, "sync started"),
      SyncEvent::SyncCompleted(report) | SyncEvent::SyncFailed(report) => match report.summary() {
        Some(summary) => write!(f, "{}", summary),
        None => write!(f, "sync finished, nothing pending"),
      },
      SyncEvent::MutationQueued { id, kind } => write!(f, "queued {} (#{})", kind, id),
      SyncEvent::AuthError => write!(f, "authentication required"),
    }
  }
}

/// Point-in-time view of the status store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
  pub online: bool,
  pub pending: usize,
  pub authenticated: bool,
}

impl StatusSnapshot {
  /// Offline banner text; `None` while online.
  pub fn banner(&self) -> Option<String> {
    if self.online {
      return None;
    }
    let mut banner = "You're offline. Changes will sync when you reconnect.".to_string();
    if self.pending > 0 {
      banner.push_str(&format!(" ({} pending)", self.pending));
    }
    Some(banner)
  }
}

struct Channels {
  online: watch::Sender<bool>,
  pending: watch::Sender<usize>,
  authenticated: watch::Sender<bool>,
  events: broadcast::Sender<SyncEvent>,
}

/// Shared status store. Clone is cheap and shares the channels.
#[derive(Clone)]
pub struct StatusStore {
  inner: Arc<Channels>,
}

impl StatusStore {
  pub fn new(online: bool) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Channels {
        online: watch::channel(online).0,
        pending: watch::channel(0).0,
        authenticated: watch::channel(true).0,
        events,
      }),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.inner.online.borrow()
  }

  /// Update the connectivity flag. Returns whether it actually changed.
  pub(crate) fn set_online(&self, online: bool) -> bool {
    self.inner.online.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    })
  }

  pub fn pending_count(&self) -> usize {
    *self.inner.pending.borrow()
  }

  pub(crate) fn set_pending(&self, count: usize) {
    self.inner.pending.send_replace(count);
  }

  pub fn is_authenticated(&self) -> bool {
    *self.inner.authenticated.borrow()
  }

  pub fn set_authenticated(&self, authenticated: bool) {
    self.inner.authenticated.send_replace(authenticated);
  }

  pub(crate) fn emit(&self, event: SyncEvent) {
    // No subscribers is not an error
    let _ = self.inner.events.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.inner.events.subscribe()
  }

  pub fn watch_online(&self) -> watch::Receiver<bool> {
    self.inner.online.subscribe()
  }

  pub fn watch_pending(&self) -> watch::Receiver<usize> {
    self.inner.pending.subscribe()
  }

  pub fn snapshot(&self) -> StatusSnapshot {
    StatusSnapshot {
      online: self.is_online(),
      pending: self.pending_count(),
      authenticated: self.is_authenticated(),
    }
  }
}
