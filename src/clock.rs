//! Time source for cache stamps and queue ordering.

use chrono::{DateTime, TimeZone, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Milliseconds between two instants, saturating at zero for clock skew.
pub(crate) fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
  let delta = later.timestamp_millis() - earlier.timestamp_millis();
  u64::try_from(delta).unwrap_or(0)
}

/// Convert a std duration to whole milliseconds for storage arithmetic.
pub(crate) fn duration_millis(duration: std::time::Duration) -> i64 {
  i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Rebuild a timestamp from stored milliseconds.
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
  Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
