//! Best-effort durable read cache.
//!
//! Storage failures never escape this type: reads degrade to misses and
//! writes are logged and dropped, so callers can always fall through to the
//! network.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheStats};
use crate::clock::{duration_millis, Clock};

/// Process-wide persistent cache. Clone is cheap and shares the backend.
#[derive(Clone)]
pub struct PersistentCache {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
}

impl PersistentCache {
  pub fn new(storage: Arc<dyn CacheStorage>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  /// Look up an entry. Storage failures and expired entries are misses.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    match self.storage.get(key) {
      Ok(Some(entry)) if entry.is_expired(self.clock.now()) => None,
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Upsert an entry stamped with the current time.
  pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
    let now = self.clock.now();
    let expires_at = ttl.map(|ttl| {
      crate::clock::from_millis(now.timestamp_millis().saturating_add(duration_millis(ttl)))
    });
    let entry = CacheEntry {
      key: key.to_string(),
      value,
      stored_at: now,
      expires_at,
    };

    if let Err(e) = self.storage.put(&entry) {
      warn!(key, error = %e, "Cache write failed");
    }
  }

  pub fn delete(&self, key: &str) {
    if let Err(e) = self.storage.delete(key) {
      warn!(key, error = %e, "Cache delete failed");
    }
  }

  /// Remove every entry in a key family (e.g. all book listings).
  pub fn delete_by_prefix(&self, prefix: &str) -> usize {
    match self.storage.delete_prefix(prefix) {
      Ok(removed) => {
        debug!(prefix, removed, "Invalidated cache prefix");
        removed
      }
      Err(e) => {
        warn!(prefix, error = %e, "Cache prefix delete failed");
        0
      }
    }
  }

  /// Remove everything, e.g. when the session ends.
  pub fn clear(&self) {
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "Cache clear failed");
    }
  }

  /// Sweep entries whose expiry has passed. Returns the number removed.
  pub fn cleanup(&self) -> usize {
    match self.storage.delete_expired(self.clock.now()) {
      Ok(removed) => {
        debug!(removed, "Cache cleanup finished");
        removed
      }
      Err(e) => {
        warn!(error = %e, "Cache cleanup failed");
        0
      }
    }
  }

  pub fn stats(&self) -> CacheStats {
    match self.storage.count() {
      Ok(item_count) => CacheStats { item_count },
      Err(e) => {
        warn!(error = %e, "Cache stats failed");
        CacheStats::default()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::testing::ManualClock;
  use chrono::{DateTime, Utc};
  use color_eyre::eyre::eyre;
  use serde_json::json;

  fn cache(clock: Arc<ManualClock>) -> PersistentCache {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap().conn());
    PersistentCache::new(Arc::new(storage), clock)
  }

  /// Backend whose every operation fails.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn get(&self, _key: &str) -> color_eyre::Result<Option<CacheEntry>> {
      Err(eyre!("disk unavailable"))
    }
    fn put(&self, _entry: &CacheEntry) -> color_eyre::Result<()> {
      Err(eyre!("disk unavailable"))
    }
    fn delete(&self, _key: &str) -> color_eyre::Result<bool> {
      Err(eyre!("disk unavailable"))
    }
    fn delete_prefix(&self, _prefix: &str) -> color_eyre::Result<usize> {
      Err(eyre!("disk unavailable"))
    }
    fn clear(&self) -> color_eyre::Result<()> {
      Err(eyre!("disk unavailable"))
    }
    fn delete_expired(&self, _now: DateTime<Utc>) -> color_eyre::Result<usize> {
      Err(eyre!("disk unavailable"))
    }
    fn count(&self) -> color_eyre::Result<usize> {
      Err(eyre!("disk unavailable"))
    }
  }

  #[test]
  fn test_read_after_write_before_expiry() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock.clone());

    cache.set("stats", json!({"read": 12}), Some(Duration::from_secs(60)));
    clock.advance(Duration::from_secs(59));

    let entry = cache.get("stats").unwrap();
    assert_eq!(entry.value, json!({"read": 12}));
    assert_eq!(entry.stored_at, clock.now() - chrono::Duration::seconds(59));
  }

  #[test]
  fn test_expired_entry_is_a_miss_until_swept() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock.clone());

    cache.set("stats", json!(1), Some(Duration::from_secs(10)));
    cache.set("settings", json!(2), None);
    clock.advance(Duration::from_secs(11));

    assert!(cache.get("stats").is_none());
    assert_eq!(cache.stats().item_count, 2);
    assert_eq!(cache.cleanup(), 1);
    assert_eq!(cache.stats().item_count, 1);
    assert!(cache.get("settings").is_some());
  }

  #[test]
  fn test_last_write_wins() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    cache.set("book:7", json!({"status": "want"}), None);
    cache.set("book:7", json!({"status": "reading"}), None);

    assert_eq!(cache.get("book:7").unwrap().value, json!({"status": "reading"}));
  }

  #[test]
  fn test_delete_and_prefix_delete() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    cache.set("books:page1", json!([]), None);
    cache.set("books:page2", json!([]), None);
    cache.set("book:1", json!({}), None);

    assert_eq!(cache.delete_by_prefix("books:"), 2);
    cache.delete("book:1");
    assert_eq!(cache.stats().item_count, 0);
  }

  #[test]
  fn test_clear_removes_everything() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);
    cache.set("dashboard", json!({}), None);
    cache.set("paths", json!([]), None);

    cache.clear();
    assert_eq!(cache.stats().item_count, 0);
  }

  #[test]
  fn test_storage_failures_are_swallowed() {
    let cache = PersistentCache::new(Arc::new(BrokenStorage), Arc::new(ManualClock::new()));

    cache.set("dashboard", json!({}), None);
    assert!(cache.get("dashboard").is_none());
    assert_eq!(cache.delete_by_prefix("books:"), 0);
    assert_eq!(cache.cleanup(), 0);
    assert_eq!(cache.stats(), CacheStats::default());
    cache.delete("dashboard");
    cache.clear();
  }
}
