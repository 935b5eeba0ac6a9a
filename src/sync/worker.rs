//! Background task driving probes, requested syncs and cache hygiene.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::monitor::ConnectivityMonitor;
use super::queue::MutationQueue;
use crate::cache::PersistentCache;

/// Handle for asking the worker to sync. The worker stops once every
/// requester is dropped.
#[derive(Clone)]
pub struct SyncRequester {
  tx: mpsc::Sender<()>,
}

impl SyncRequester {
  /// Request a sync pass. Requests made while one is pending coalesce.
  pub fn request(&self) -> bool {
    match self.tx.try_send(()) {
      Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
      Err(mpsc::error::TrySendError::Closed(())) => false,
    }
  }
}

pub struct SyncWorker {
  monitor: ConnectivityMonitor,
  queue: Arc<MutationQueue>,
  cache: PersistentCache,
  /// `None` disables probing (connectivity is then forced by the caller)
  probe_interval: Option<Duration>,
  cleanup_interval: Duration,
  requests: mpsc::Receiver<()>,
}

impl SyncWorker {
  pub fn new(
    monitor: ConnectivityMonitor,
    queue: Arc<MutationQueue>,
    cache: PersistentCache,
    probe_interval: Option<Duration>,
    cleanup_interval: Duration,
  ) -> (Self, SyncRequester) {
    let (tx, requests) = mpsc::channel(1);
    let worker = Self {
      monitor,
      queue,
      cache,
      probe_interval,
      cleanup_interval,
      requests,
    };
    (worker, SyncRequester { tx })
  }

  pub async fn run(mut self) {
    let probing = self.probe_interval.is_some();
    let mut probe_timer = interval(self.probe_interval.unwrap_or(Duration::from_secs(3600)));
    probe_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cleanup_timer = interval(self.cleanup_interval);
    cleanup_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(probing, "Sync worker started");

    loop {
      tokio::select! {
        _ = probe_timer.tick(), if probing => {
          self.monitor.probe_once().await;
        }
        _ = cleanup_timer.tick() => {
          let removed = self.cache.cleanup();
          if removed > 0 {
            debug!(removed, "Swept expired cache entries");
          }
        }
        request = self.requests.recv() => match request {
          Some(()) => {
            let report = self.queue.sync().await;
            debug!(synced = report.synced, failed = report.failed, "Requested sync finished");
          }
          None => {
            info!("Sync worker stopping");
            break;
          }
        },
      }
    }
  }
}
