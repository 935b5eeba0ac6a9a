//! Connectivity tracking and the offline-to-online sync trigger.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::queue::MutationQueue;
use crate::api::{ApiRequest, Transport};
use crate::event::{StatusStore, SyncEvent, SyncReport};

/// Owns the online flag transitions. Clone is cheap.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  status: StatusStore,
  queue: Arc<MutationQueue>,
  transport: Arc<dyn Transport>,
  health_endpoint: String,
}

impl ConnectivityMonitor {
  pub fn new(
    status: StatusStore,
    queue: Arc<MutationQueue>,
    transport: Arc<dyn Transport>,
    health_endpoint: impl Into<String>,
  ) -> Self {
    Self {
      status,
      queue,
      transport,
      health_endpoint: health_endpoint.into(),
    }
  }

  pub fn is_online(&self) -> bool {
    self.status.is_online()
  }

  /// Record the platform's connectivity signal.
  ///
  /// Only real transitions act: going online emits [`SyncEvent::Online`] and
  /// replays the queue, going offline emits [`SyncEvent::Offline`]. Returns
  /// the report of the replay this triggered, if any.
  pub async fn set_online(&self, online: bool) -> Option<SyncReport> {
    if !self.status.set_online(online) {
      return None;
    }

    if online {
      info!("Connection restored");
      self.status.emit(SyncEvent::Online);
      Some(self.queue.sync().await)
    } else {
      warn!("Connection lost, writes will be queued");
      self.status.emit(SyncEvent::Offline);
      None
    }
  }

  /// Probe the API once and record the result. Any HTTP answer counts as
  /// reachable.
  pub async fn probe_once(&self) -> bool {
    let online = match self
      .transport
      .send(ApiRequest::get(self.health_endpoint.as_str()))
      .await
    {
      Ok(response) => {
        debug!(status = response.status, "Health probe answered");
        true
      }
      Err(e) if e.is_connectivity() => {
        debug!(error = %e, "Health probe failed");
        false
      }
      Err(e) => {
        debug!(error = %e, "Health probe error, assuming reachable");
        true
      }
    };
    self.set_online(online).await;
    online
  }
}
