//! Request gateway: read-through caching, read deduplication and writes.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::keys::Invalidation;
use super::transport::{ApiRequest, Transport};
use crate::cache::{CacheResult, PersistentCache};
use crate::clock::{millis_between, Clock};
use crate::error::ApiError;
use crate::event::{StatusStore, SyncEvent};

/// Outcome of a network read, shared by every caller waiting on the same key.
type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Options for a single read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
  /// Cache key; defaults to the endpoint
  pub cache_key: Option<String>,
  /// Maximum age of a cached result served without a network call
  pub ttl: Duration,
  /// Always go to the network (the result is still stored)
  pub skip_cache: bool,
}

impl ReadOptions {
  pub fn cached(cache_key: impl Into<String>, ttl: Duration) -> Self {
    Self {
      cache_key: Some(cache_key.into()),
      ttl,
      skip_cache: false,
    }
  }

  pub fn uncached() -> Self {
    Self {
      cache_key: None,
      ttl: Duration::ZERO,
      skip_cache: true,
    }
  }
}

/// All network reads and writes go through the gateway.
///
/// Per key, a read moves through `EMPTY -> FETCHING -> FRESH -> STALE ->
/// FETCHING`; the in-flight table guarantees at most one `FETCHING` at a time.
/// Clone is cheap and shares the cache, transport and in-flight table.
#[derive(Clone)]
pub struct RequestGateway {
  transport: Arc<dyn Transport>,
  cache: PersistentCache,
  status: StatusStore,
  clock: Arc<dyn Clock>,
  in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
  /// Expiry given to stored read results
  retention: Option<Duration>,
}

impl RequestGateway {
  pub fn new(
    transport: Arc<dyn Transport>,
    cache: PersistentCache,
    status: StatusStore,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      transport,
      cache,
      status,
      clock,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      retention: None,
    }
  }

  /// Set how long stored read results survive the cleanup sweep.
  pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
    self.retention = retention;
    self
  }

  pub fn cache(&self) -> &PersistentCache {
    &self.cache
  }

  pub fn status(&self) -> &StatusStore {
    &self.status
  }

  /// Read with cache-first strategy.
  ///
  /// 1. If online and not skipping the cache, a result younger than `ttl` is
  ///    returned without a network call
  /// 2. A fetch already in flight for the key is joined
  /// 3. Otherwise a new fetch is issued and its result stored
  /// 4. On a connectivity failure, any cached result is served (offline mode)
  pub async fn get(
    &self,
    endpoint: &str,
    options: &ReadOptions,
  ) -> Result<CacheResult<Value>, ApiError> {
    let key = options
      .cache_key
      .clone()
      .unwrap_or_else(|| endpoint.to_string());

    if !options.skip_cache && self.status.is_online() {
      if let Some(entry) = self.cache.get(&key) {
        let age = millis_between(entry.stored_at, self.clock.now());
        if u128::from(age) < options.ttl.as_millis() {
          debug!(key = %key, age_ms = age, "Cache hit");
          return Ok(CacheResult::from_cache(entry.value, entry.stored_at));
        }
      }
    }

    match self.shared_fetch(endpoint, &key).await {
      Ok(value) => Ok(CacheResult::from_network(value)),
      Err(e) if e.is_connectivity() && !options.skip_cache => match self.cache.get(&key) {
        Some(entry) => {
          info!(key = %key, "Network unreachable, serving cached data");
          Ok(CacheResult::offline(entry.value, entry.stored_at))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  /// Write straight to the network, bypassing the cache.
  pub async fn write(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<Value>,
  ) -> Result<Value, ApiError> {
    self
      .send(ApiRequest::with_body(method, endpoint, body))
      .await
  }

  pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ApiError> {
    self.write(Method::POST, endpoint, Some(body)).await
  }

  pub async fn patch(&self, endpoint: &str, body: Value) -> Result<Value, ApiError> {
    self.write(Method::PATCH, endpoint, Some(body)).await
  }

  pub async fn delete(&self, endpoint: &str) -> Result<Value, ApiError> {
    self.write(Method::DELETE, endpoint, None).await
  }

  /// Drop every cache key and prefix in `invalidations`.
  pub fn invalidate(&self, invalidations: &[Invalidation]) {
    for invalidation in invalidations {
      match invalidation {
        Invalidation::Key(key) => self.cache.delete(key),
        Invalidation::Prefix(prefix) => {
          self.cache.delete_by_prefix(prefix);
        }
      }
    }
  }

  /// Drop the whole cache (session end).
  pub fn invalidate_all(&self) {
    self.cache.clear();
  }

  /// Join the in-flight fetch for `key`, or start one.
  fn shared_fetch(&self, endpoint: &str, key: &str) -> SharedFetch {
    let mut in_flight = self.lock_in_flight();
    if let Some(existing) = in_flight.get(key) {
      debug!(key, "Joining in-flight request");
      return existing.clone();
    }

    let fetch = self.spawn_fetch(endpoint.to_string(), key.to_string());
    in_flight.insert(key.to_string(), fetch.clone());
    fetch
  }

  /// The fetch runs on its own task so it completes, and is cached, even if
  /// every caller stops waiting.
  fn spawn_fetch(&self, endpoint: String, key: String) -> SharedFetch {
    let gateway = self.clone();
    let handle = tokio::spawn(async move {
      let result = gateway.send(ApiRequest::get(endpoint)).await;
      if let Ok(ref value) = result {
        gateway.cache.set(&key, value.clone(), gateway.retention);
      }
      gateway.lock_in_flight().remove(&key);
      result
    });

    async move {
      handle
        .await
        .unwrap_or_else(|e| Err(ApiError::InvalidResponse(format!("Request task failed: {}", e))))
    }
    .boxed()
    .shared()
  }

  fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Issue a request and interpret the status.
  async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
    let method = request.method.clone();
    let endpoint = request.endpoint.clone();
    let response = self.transport.send(request).await?;

    if response.status == 401 {
      warn!(method = %method, endpoint = %endpoint, "Unauthorized");
      self.status.set_authenticated(false);
      self.status.emit(SyncEvent::AuthError);
      return Err(ApiError::Unauthorized);
    }

    if !response.is_success() {
      debug!(method = %method, endpoint = %endpoint, status = response.status, "Request rejected");
      return Err(ApiError::from_status(response.status, &response.body));
    }

    if response.body.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&response.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::testing::{FakeTransport, TestEnv};
  use serde_json::json;

  const TTL: Duration = Duration::from_secs(30);

  #[tokio::test]
  async fn test_ttl_expiry_scenario() {
    let env = TestEnv::new(FakeTransport::new());
    env
      .transport
      .respond(Method::GET, "/books", 200, json!([{"id": 1}]));
    let options = ReadOptions::cached("books:all", TTL);

    let first = env.gateway.get("/books", &options).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(env.transport.calls_to(Method::GET, "/books"), 1);

    env.clock.advance(Duration::from_secs(10));
    let second = env.gateway.get("/books", &options).await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, json!([{"id": 1}]));
    assert_eq!(env.transport.calls_to(Method::GET, "/books"), 1);

    env.clock.advance(Duration::from_secs(21));
    let third = env.gateway.get("/books", &options).await.unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(env.transport.calls_to(Method::GET, "/books"), 2);
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_fetch() {
    let env = TestEnv::new(FakeTransport::new().with_delay(Duration::from_millis(20)));
    env
      .transport
      .respond(Method::GET, "/dashboard", 200, json!({"reading": 3}));
    let options = ReadOptions::cached("dashboard", TTL);

    let reads = (0..5).map(|_| env.gateway.get("/dashboard", &options));
    let results = futures::future::join_all(reads).await;

    assert_eq!(env.transport.calls_to(Method::GET, "/dashboard"), 1);
    for result in results {
      assert_eq!(result.unwrap().data, json!({"reading": 3}));
    }
    assert!(env.gateway.lock_in_flight().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_failures_are_shared_and_cleared() {
    let env = TestEnv::new(FakeTransport::new().with_delay(Duration::from_millis(20)));
    env.transport.respond(Method::GET, "/stats", 500, json!({}));
    env.transport.respond(Method::GET, "/stats", 200, json!({"total": 9}));
    let options = ReadOptions::cached("stats", TTL);

    let (a, b) = tokio::join!(
      env.gateway.get("/stats", &options),
      env.gateway.get("/stats", &options)
    );
    assert_eq!(a.unwrap_err().status(), Some(500));
    assert_eq!(b.unwrap_err().status(), Some(500));
    assert_eq!(env.transport.calls_to(Method::GET, "/stats"), 1);

    // The failed fetch left the table, so the next read goes out again
    let retry = env.gateway.get("/stats", &options).await.unwrap();
    assert_eq!(retry.data, json!({"total": 9}));
    assert_eq!(env.transport.calls_to(Method::GET, "/stats"), 2);
  }

  #[tokio::test]
  async fn test_skip_cache_always_fetches() {
    let env = TestEnv::new(FakeTransport::new());
    let options = ReadOptions::uncached();

    env
      .gateway
      .get("/search/openlibrary?q=dune&limit=10", &options)
      .await
      .unwrap();
    env
      .gateway
      .get("/search/openlibrary?q=dune&limit=10", &options)
      .await
      .unwrap();

    assert_eq!(
      env
        .transport
        .calls_to(Method::GET, "/search/openlibrary?q=dune&limit=10"),
      2
    );
  }

  #[tokio::test]
  async fn test_connectivity_failure_falls_back_to_stale_cache() {
    let env = TestEnv::new(FakeTransport::new());
    env
      .transport
      .respond(Method::GET, "/paths", 200, json!([{"id": 4}]));
    let options = ReadOptions::cached("paths", TTL);
    env.gateway.get("/paths", &options).await.unwrap();

    env.clock.advance(Duration::from_secs(3600));
    env.transport.set_unreachable(true);
    env.status.set_online(false);

    let result = env.gateway.get("/paths", &options).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!([{"id": 4}]));
  }

  #[tokio::test]
  async fn test_connectivity_failure_without_cache_propagates() {
    let env = TestEnv::new(FakeTransport::new());
    env.transport.set_unreachable(true);

    let err = env
      .gateway
      .get("/settings", &ReadOptions::cached("settings", TTL))
      .await
      .unwrap_err();
    assert!(err.is_connectivity());
  }

  #[tokio::test]
  async fn test_abandoned_read_still_caches_result() {
    let env = TestEnv::new(FakeTransport::new().with_delay(Duration::from_millis(30)));
    env
      .transport
      .respond(Method::GET, "/pipeline", 200, json!({"wip": 2}));
    let options = ReadOptions::cached("pipeline", TTL);

    let abandoned =
      tokio::time::timeout(Duration::from_millis(5), env.gateway.get("/pipeline", &options)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(env.gateway.cache().get("pipeline").unwrap().value, json!({"wip": 2}));
  }

  #[tokio::test]
  async fn test_unauthorized_clears_flag_and_emits_event() {
    let env = TestEnv::new(FakeTransport::new());
    let mut events = env.status.subscribe();
    env
      .transport
      .respond(Method::PATCH, "/books/3", 401, json!({"error": "login"}));

    let err = env
      .gateway
      .patch("/books/3", json!({"rating": 5}))
      .await
      .unwrap_err();

    assert_eq!(err, ApiError::Unauthorized);
    assert!(!env.status.is_authenticated());
    assert_eq!(events.recv().await.unwrap(), SyncEvent::AuthError);
    assert_eq!(env.transport.calls_to(Method::PATCH, "/books/3"), 1);
  }

  #[tokio::test]
  async fn test_write_failure_carries_status() {
    let env = TestEnv::new(FakeTransport::new());
    env
      .transport
      .respond(Method::POST, "/paths", 422, json!({"error": "name required"}));

    let err = env.gateway.post("/paths", json!({})).await.unwrap_err();
    assert_eq!(err.status(), Some(422));
  }

  #[tokio::test]
  async fn test_no_content_is_null() {
    let env = TestEnv::new(FakeTransport::new());
    env
      .transport
      .respond(Method::DELETE, "/paths/2", 204, Value::Null);

    assert_eq!(env.gateway.delete("/paths/2").await.unwrap(), Value::Null);
  }

  #[tokio::test]
  async fn test_invalidate_keys_and_prefixes() {
    let env = TestEnv::new(FakeTransport::new());
    env.gateway.cache().set("books:a", json!([]), None);
    env.gateway.cache().set("books:b", json!([]), None);
    env.gateway.cache().set("book:1", json!({}), None);
    env.gateway.cache().set("paths", json!([]), None);

    env.gateway.invalidate(&[
      Invalidation::Prefix("books:".into()),
      Invalidation::Key("book:1".into()),
    ]);

    assert_eq!(env.gateway.cache().stats().item_count, 1);
    assert!(env.gateway.cache().get("paths").is_some());
  }
}
