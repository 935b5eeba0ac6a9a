//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single cached request result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// Unique cache key (e.g. "books:<hash>", "book:42")
  pub key: String,
  /// The cached payload
  pub value: Value,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
  /// When the hygiene sweep may remove the entry
  pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|expires_at| expires_at < now)
  }
}

/// Result from a gateway read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a fresh cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, younger than the read's TTL
  CacheFresh,
  /// Offline mode - network unreachable, serving cached data of any age
  Offline,
}

/// Cache statistics for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub item_count: usize,
}
