//! Record store: the de-duplicated set of known records for one cache key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{SyncError, SyncResult};
use crate::github::RawRecord;

/// Closures reported up to this many seconds before creation are clamped
/// to the creation time instead of being rejected.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 5;

/// A single historical fact about a star, issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub id: u64,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub closed_at: Option<DateTime<Utc>>,
  /// Most recent remote observation confirming the record still exists
  pub last_seen_at: DateTime<Utc>,
  /// Set by reconciliation when a complete listing no longer contains the record
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub absent_since: Option<DateTime<Utc>>,
}

impl Record {
  /// Build a record from a remote observation made at `seen_at`.
  pub fn observed(raw: RawRecord, seen_at: DateTime<Utc>) -> Self {
    Self {
      id: raw.id,
      created_at: raw.created_at,
      closed_at: raw.closed_at,
      last_seen_at: seen_at.max(raw.created_at),
      absent_since: None,
    }
  }

  /// Time the record stopped counting as open, if it did.
  ///
  /// The earlier of closure and absence, never before creation.
  pub fn ended_at(&self) -> Option<DateTime<Utc>> {
    let end = match (self.closed_at, self.absent_since) {
      (Some(closed), Some(absent)) => Some(closed.min(absent)),
      (closed, absent) => closed.or(absent),
    };
    end.map(|end| end.max(self.created_at))
  }

  /// Still listed by the remote as of the last observation.
  pub fn is_present(&self) -> bool {
    self.absent_since.is_none()
  }

  fn validate(mut self) -> SyncResult<Self> {
    if let Some(closed) = self.closed_at {
      if closed < self.created_at - Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
        return Err(SyncError::invalid_record(
          self.id,
          format!("closed at {} before creation at {}", closed, self.created_at),
        ));
      }
    }
    self.normalize();
    Ok(self)
  }

  /// Fold another observation of the same id into this one.
  ///
  /// Every field combines with a commutative, idempotent operator so the
  /// result does not depend on the order observations arrive in.
  fn merge(&mut self, other: Record) {
    self.created_at = self.created_at.min(other.created_at);
    self.closed_at = match (self.closed_at, other.closed_at) {
      (Some(a), Some(b)) => Some(a.max(b)),
      (a, b) => a.or(b),
    };
    self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
    self.absent_since = match (self.absent_since, other.absent_since) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (a, b) => a.or(b),
    };
    self.normalize();
  }

  fn normalize(&mut self) {
    if let Some(closed) = self.closed_at {
      self.closed_at = Some(closed.max(self.created_at));
    }
    // Seen again after being reported absent
    if matches!(self.absent_since, Some(absent) if absent <= self.last_seen_at) {
      self.absent_since = None;
    }
  }
}

/// Effect of an upsert on the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
  Inserted,
  Updated,
  Unchanged,
}

/// Known records for one (repository, category) pair, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Record>", try_from = "Vec<Record>")]
pub struct RecordStore {
  records: BTreeMap<u64, Record>,
}

impl RecordStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn get(&self, id: u64) -> Option<&Record> {
    self.records.get(&id)
  }

  /// Insert a record or merge it into the existing one with the same id.
  ///
  /// Only the closure time and the last-seen time can change for a known
  /// id; a closure is never removed again.
  pub fn upsert(&mut self, record: Record) -> SyncResult<Upsert> {
    let record = record.validate()?;

    match self.records.entry(record.id) {
      Entry::Vacant(entry) => {
        entry.insert(record);
        Ok(Upsert::Inserted)
      }
      Entry::Occupied(mut entry) => {
        let existing = entry.get_mut();
        let before = existing.clone();
        existing.merge(record);
        if *existing == before {
          Ok(Upsert::Unchanged)
        } else {
          Ok(Upsert::Updated)
        }
      }
    }
  }

  /// Record that `id` was missing from a complete listing taken at `as_of`.
  ///
  /// The record is kept. Returns false if the id is unknown or the record was
  /// observed at or after `as_of`.
  pub fn mark_absent_since(&mut self, id: u64, as_of: DateTime<Utc>) -> bool {
    let Some(record) = self.records.get_mut(&id) else {
      return false;
    };
    if record.last_seen_at >= as_of {
      return false;
    }

    let absent = record.absent_since.map_or(as_of, |current| current.min(as_of));
    let changed = record.absent_since != Some(absent);
    record.absent_since = Some(absent);
    changed
  }

  /// All records ordered by creation time, ties broken by id.
  ///
  /// Each call starts a fresh pass over the store.
  pub fn all(&self) -> impl Iterator<Item = &Record> + '_ {
    let mut ordered: Vec<&Record> = self.records.values().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    ordered.into_iter()
  }

  pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
    self.records.keys().copied()
  }

  /// Number of records the remote still listed at the last observation.
  pub fn present_count(&self) -> usize {
    self.records.values().filter(|r| r.is_present()).count()
  }
}

impl From<RecordStore> for Vec<Record> {
  fn from(store: RecordStore) -> Self {
    store.all().cloned().collect()
  }
}

impl TryFrom<Vec<Record>> for RecordStore {
  type Error = SyncError;

  fn try_from(records: Vec<Record>) -> Result<Self, Self::Error> {
    let mut store = RecordStore::new();
    for record in records {
      store.upsert(record)?;
    }
    Ok(store)
  }
}
