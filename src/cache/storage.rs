//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::CacheEntry;
use crate::clock::from_millis;

/// Trait for cache storage backends.
///
/// Every operation is a keyed upsert or delete so the store can be shared by
/// several execution contexts.
pub trait CacheStorage: Send + Sync {
  /// Get an entry by key.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Delete a single entry. Returns whether it existed.
  fn delete(&self, key: &str) -> Result<bool>;

  /// Delete every entry whose key starts with `prefix`.
  fn delete_prefix(&self, prefix: &str) -> Result<usize>;

  /// Delete every entry.
  fn clear(&self) -> Result<()>;

  /// Delete entries with `expires_at < now`.
  fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;

  /// Number of stored entries.
  fn count(&self) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }

  fn delete_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }

  fn count(&self) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Wrap a connection whose schema has already been migrated.
  pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
    Self { conn }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, i64, Option<i64>)> = conn
      .query_row(
        "SELECT value, timestamp, expires_at FROM cache WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((data, stored_at, expires_at)) => {
        let value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry {}: {}", key, e))?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          value,
          stored_at: from_millis(stored_at),
          expires_at: expires_at.map(from_millis),
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache (key, value, timestamp, expires_at)
         VALUES (?, ?, ?, ?)",
        params![
          entry.key,
          data,
          entry.stored_at.timestamp_millis(),
          entry.expires_at.map(|t| t.timestamp_millis())
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM cache WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;
    Ok(removed > 0)
  }

  fn delete_prefix(&self, prefix: &str) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Keys are scanned in order starting at the prefix; the first key that
    // no longer matches ends the pass.
    let matching: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT key FROM cache WHERE key >= ? ORDER BY key")
        .map_err(|e| eyre!("Failed to prepare prefix scan: {}", e))?;
      let keys = stmt
        .query_map(params![prefix], |row| row.get::<_, String>(0))
        .map_err(|e| eyre!("Failed to scan cache keys: {}", e))?;

      let mut matching = Vec::new();
      for key in keys {
        let key = key.map_err(|e| eyre!("Failed to read cache key: {}", e))?;
        if !key.starts_with(prefix) {
          break;
        }
        matching.push(key);
      }
      matching
    };

    for key in &matching {
      tx.execute("DELETE FROM cache WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(matching.len())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    Ok(())
  }

  fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at < ?",
        params![now.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to sweep expired entries: {}", e))?;
    Ok(removed)
  }

  fn count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(usize::try_from(count).unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use chrono::Duration;
  use serde_json::json;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap().conn())
  }

  fn entry(key: &str, value: serde_json::Value) -> CacheEntry {
    CacheEntry {
      key: key.to_string(),
      value,
      stored_at: from_millis(1_700_000_000_000),
      expires_at: None,
    }
  }

  #[test]
  fn test_put_then_get() {
    let storage = storage();
    storage.put(&entry("book:1", json!({"title": "Dune"}))).unwrap();

    let cached = storage.get("book:1").unwrap().unwrap();
    assert_eq!(cached.value, json!({"title": "Dune"}));
    assert_eq!(cached.stored_at, from_millis(1_700_000_000_000));
    assert!(storage.get("book:2").unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_existing_key() {
    let storage = storage();
    storage.put(&entry("settings", json!({"wip_limit": 5}))).unwrap();
    storage.put(&entry("settings", json!({"wip_limit": 3}))).unwrap();

    assert_eq!(storage.count().unwrap(), 1);
    assert_eq!(
      storage.get("settings").unwrap().unwrap().value,
      json!({"wip_limit": 3})
    );
  }

  #[test]
  fn test_delete_prefix_only_touches_matching_keys() {
    let storage = storage();
    for key in ["book:1", "books:a", "books:b", "booksellers", "dashboard"] {
      storage.put(&entry(key, json!(null))).unwrap();
    }

    assert_eq!(storage.delete_prefix("books:").unwrap(), 2);
    assert!(storage.get("books:a").unwrap().is_none());
    assert!(storage.get("book:1").unwrap().is_some());
    assert!(storage.get("booksellers").unwrap().is_some());
    assert!(storage.get("dashboard").unwrap().is_some());
  }

  #[test]
  fn test_delete_expired_keeps_unbounded_and_live_entries() {
    let storage = storage();
    let now = from_millis(1_700_000_000_000);

    let mut expired = entry("stats", json!(1));
    expired.expires_at = Some(now - Duration::seconds(1));
    let mut live = entry("paths", json!(2));
    live.expires_at = Some(now + Duration::seconds(60));
    storage.put(&expired).unwrap();
    storage.put(&live).unwrap();
    storage.put(&entry("pipeline", json!(3))).unwrap();

    assert_eq!(storage.delete_expired(now).unwrap(), 1);
    assert_eq!(storage.count().unwrap(), 2);
    assert!(storage.get("stats").unwrap().is_none());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.put(&entry("book:1", json!(1))).unwrap();
    assert!(storage.get("book:1").unwrap().is_none());
    assert_eq!(storage.count().unwrap(), 0);
  }
}
