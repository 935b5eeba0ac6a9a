//! Test doubles shared by the in-module test suites.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{ApiRequest, ApiResponse, LibraryClient, RequestGateway, Transport};
use crate::cache::{PersistentCache, SqliteStorage};
use crate::clock::Clock;
use crate::config::CacheTtls;
use crate::db::Database;
use crate::error::ApiError;
use crate::event::StatusStore;
use crate::sync::{ConnectivityMonitor, MutationQueue, SqliteMutationStore};

/// Clock that only moves when told to.
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap();
    *now += chrono::Duration::from_std(by).unwrap();
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

type Scripted = Result<ApiResponse, ApiError>;

/// Transport that answers from a script and records every request.
///
/// Each route holds a queue of outcomes; the last one is sticky. Unscripted
/// routes answer `200 {}`.
pub struct FakeTransport {
  routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
  calls: Mutex<Vec<ApiRequest>>,
  unreachable: AtomicBool,
  delay: Duration,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      unreachable: AtomicBool::new(false),
      delay: Duration::ZERO,
    }
  }

  /// Delay every answer, so concurrent callers overlap.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn respond(&self, method: Method, endpoint: &str, status: u16, body: Value) {
    let body = if body.is_null() {
      String::new()
    } else {
      body.to_string()
    };
    self.push(method, endpoint, Ok(ApiResponse { status, body }));
  }

  pub fn fail(&self, method: Method, endpoint: &str, error: ApiError) {
    self.push(method, endpoint, Err(error));
  }

  /// Make every request fail with a connectivity error.
  pub fn set_unreachable(&self, unreachable: bool) {
    self.unreachable.store(unreachable, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, method: Method, endpoint: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.method == method && r.endpoint == endpoint)
      .count()
  }

  fn push(&self, method: Method, endpoint: &str, outcome: Scripted) {
    self
      .routes
      .lock()
      .unwrap()
      .entry((method, endpoint.to_string()))
      .or_default()
      .push_back(outcome);
  }

  fn next_outcome(&self, request: &ApiRequest) -> Scripted {
    if self.unreachable.load(Ordering::SeqCst) {
      return Err(ApiError::Connectivity("connection refused".into()));
    }
    let mut routes = self.routes.lock().unwrap();
    match routes.get_mut(&(request.method.clone(), request.endpoint.clone())) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
      Some(queue) => queue.front().cloned().unwrap(),
      None => Ok(ApiResponse {
        status: 200,
        body: "{}".into(),
      }),
    }
  }
}

impl Transport for FakeTransport {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
    self.calls.lock().unwrap().push(request.clone());
    let outcome = self.next_outcome(&request);
    let delay = self.delay;
    async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      outcome
    }
    .boxed()
  }
}

/// Fully wired core over an in-memory database and a fake transport.
pub struct TestEnv {
  pub transport: Arc<FakeTransport>,
  pub clock: Arc<ManualClock>,
  pub status: StatusStore,
  pub gateway: RequestGateway,
  pub client: LibraryClient,
  pub store: Arc<SqliteMutationStore>,
  pub queue: Arc<MutationQueue>,
  pub db: Database,
}

impl TestEnv {
  pub fn new(transport: FakeTransport) -> Self {
    Self::with_database(transport, Database::open_in_memory().unwrap())
  }

  pub fn with_database(transport: FakeTransport, db: Database) -> Self {
    let transport = Arc::new(transport);
    let clock = Arc::new(ManualClock::new());
    let status = StatusStore::new(true);

    let cache = PersistentCache::new(Arc::new(SqliteStorage::new(db.conn())), clock.clone());
    let gateway = RequestGateway::new(transport.clone(), cache, status.clone(), clock.clone());
    let client = LibraryClient::new(gateway.clone(), CacheTtls::default());
    let store = Arc::new(SqliteMutationStore::new(db.conn()));
    let queue = Arc::new(MutationQueue::new(
      store.clone(),
      client.clone(),
      status.clone(),
      clock.clone(),
    ));

    Self {
      transport,
      clock,
      status,
      gateway,
      client,
      store,
      queue,
      db,
    }
  }

  pub fn monitor(&self) -> ConnectivityMonitor {
    ConnectivityMonitor::new(
      self.status.clone(),
      self.queue.clone(),
      self.transport.clone(),
      "/auth/check",
    )
  }
}
