//! Durable storage for queued mutations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use super::mutation::Mutation;
use crate::clock::{duration_millis, from_millis};

/// How long a replayer may hold a row before another may take it over.
pub const CLAIM_LEASE: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Result of trying to take a row for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
  /// Taken; carries the row's current attempt count
  Acquired { attempt: u32 },
  /// Another replayer holds an unexpired claim
  Held,
  /// The row no longer exists
  Gone,
}

/// Backend for the mutation queue. Rows come back in FIFO order.
pub trait MutationStore: Send + Sync {
  /// Append a row with zero attempts; returns the assigned id.
  fn insert(&self, kind: &str, payload: &Value, enqueued_at: DateTime<Utc>) -> Result<i64>;

  /// All rows ordered by enqueue time, then id.
  fn list(&self) -> Result<Vec<Mutation>>;

  fn delete(&self, id: i64) -> Result<()>;

  /// Record a failed attempt and release any claim on the row.
  fn set_attempt(&self, id: i64, attempt: u32) -> Result<()>;

  /// Atomically take the row for replay by `owner`. Claims older than
  /// [`CLAIM_LEASE`] are taken over.
  fn claim(&self, id: i64, owner: &str, now: DateTime<Utc>) -> Result<Claim>;

  /// Give the row back without recording an attempt.
  fn release(&self, id: i64, owner: &str) -> Result<()>;

  fn count(&self) -> Result<usize>;

  fn clear(&self) -> Result<()>;
}

/// SQLite-backed mutation store.
pub struct SqliteMutationStore {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteMutationStore {
  pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
    Self { conn }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl MutationStore for SqliteMutationStore {
  fn insert(&self, kind: &str, payload: &Value, enqueued_at: DateTime<Utc>) -> Result<i64> {
    let conn = self.lock()?;
    let data =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;

    conn
      .execute(
        "INSERT INTO mutations (type, data, timestamp, retries) VALUES (?, ?, ?, 0)",
        params![kind, data, enqueued_at.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store mutation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list(&self) -> Result<Vec<Mutation>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, type, data, timestamp, retries FROM mutations ORDER BY timestamp, id")
      .map_err(|e| eyre!("Failed to prepare mutation scan: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, Vec<u8>>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, u32>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read mutations: {}", e))?;

    let mut mutations = Vec::new();
    for row in rows {
      let (id, kind, data, timestamp, attempt) =
        row.map_err(|e| eyre!("Failed to read mutation row: {}", e))?;
      // A corrupt payload still yields a row, so sync can drop it
      let payload = serde_json::from_slice(&data).ok();
      mutations.push(Mutation {
        id,
        kind,
        payload,
        enqueued_at: from_millis(timestamp),
        attempt,
      });
    }
    Ok(mutations)
  }

  fn delete(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM mutations WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete mutation {}: {}", id, e))?;
    Ok(())
  }

  fn set_attempt(&self, id: i64, attempt: u32) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE mutations SET retries = ?, claimed_by = NULL, claimed_at = NULL WHERE id = ?",
        params![attempt, id],
      )
      .map_err(|e| eyre!("Failed to update mutation {}: {}", id, e))?;
    Ok(())
  }

  fn claim(&self, id: i64, owner: &str, now: DateTime<Utc>) -> Result<Claim> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin claim: {}", e))?;

    let now_ms = now.timestamp_millis();
    let stale_before = now_ms.saturating_sub(duration_millis(CLAIM_LEASE));
    let taken = tx
      .execute(
        "UPDATE mutations SET claimed_by = ?, claimed_at = ?
         WHERE id = ? AND (claimed_by IS NULL OR claimed_by = ? OR claimed_at < ?)",
        params![owner, now_ms, id, owner, stale_before],
      )
      .map_err(|e| eyre!("Failed to claim mutation {}: {}", id, e))?;

    let claim = if taken > 0 {
      let attempt = tx
        .query_row("SELECT retries FROM mutations WHERE id = ?", params![id], |row| {
          row.get(0)
        })
        .map_err(|e| eyre!("Failed to read mutation {}: {}", id, e))?;
      Claim::Acquired { attempt }
    } else {
      let exists = tx
        .query_row("SELECT 1 FROM mutations WHERE id = ?", params![id], |_| Ok(()))
        .optional()
        .map_err(|e| eyre!("Failed to look up mutation {}: {}", id, e))?;
      if exists.is_some() {
        Claim::Held
      } else {
        Claim::Gone
      }
    };

    tx.commit()
      .map_err(|e| eyre!("Failed to commit claim: {}", e))?;
    Ok(claim)
  }

  fn release(&self, id: i64, owner: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE mutations SET claimed_by = NULL, claimed_at = NULL
         WHERE id = ? AND claimed_by = ?",
        params![id, owner],
      )
      .map_err(|e| eyre!("Failed to release mutation {}: {}", id, e))?;
    Ok(())
  }

  fn count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM mutations", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count mutations: {}", e))?;
    Ok(usize::try_from(count).unwrap_or(0))
  }

  fn clear(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM mutations", [])
      .map_err(|e| eyre!("Failed to clear mutations: {}", e))?;
    Ok(())
  }
}
