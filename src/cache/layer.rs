//! Cache layer that orchestrates caching logic with remote fetching.

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::store::{Record, Upsert};
use super::traits::{Cache, CacheKey, CacheResult};
use crate::error::{SyncError, SyncResult};
use crate::github::{Cursor, RemoteError, RemoteSource};

/// How much history a sync should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
  /// Resume from the stored cursor when the cache is complete
  #[default]
  Incremental,
  /// List the full history and reconcile vanished records
  Full,
}

/// Counters for one pass over the remote listing.
#[derive(Debug, Default)]
struct SweepStats {
  fetched: usize,
  inserted: usize,
  updated: usize,
  skipped: usize,
  malformed: usize,
  absent: usize,
}

/// Cache layer that keeps persisted caches in step with a remote source.
///
/// A sync works on a copy of the loaded cache and only persists it once the
/// remote listing was consumed to the end, so an interrupted sync leaves the
/// stored cache exactly as it was.
pub struct CacheLayer<S: CacheStorage, R: RemoteSource> {
  storage: Arc<S>,
  remote: Arc<R>,
  /// How long a complete cache is served without asking the remote
  stale_time: Duration,
}

impl<S: CacheStorage, R: RemoteSource> CacheLayer<S, R> {
  /// Create a new cache layer with the given storage backend and remote.
  pub fn new(storage: S, remote: R) -> Self {
    Self {
      storage: Arc::new(storage),
      remote: Arc::new(remote),
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn remote(&self) -> &R {
    &self.remote
  }

  /// Check if a cache needs a sync based on its last sync time.
  fn is_stale(&self, cache: &Cache, now: DateTime<Utc>) -> bool {
    match cache.synced_at {
      Some(synced_at) if cache.complete => now - synced_at >= self.stale_time,
      _ => true,
    }
  }

  /// Bring the cache for `key` up to date with the remote.
  pub async fn sync(&self, key: &CacheKey, mode: SyncMode) -> SyncResult<CacheResult<Cache>> {
    self.sync_at(key, mode, Utc::now()).await
  }

  /// [`sync`](Self::sync) with an explicit observation time.
  ///
  /// 1. Load the cache - if complete and fresh, return it
  /// 2. Fetch from the cursor (or the full history) and merge
  /// 3. Reconcile vanished records after a complete listing
  /// 4. Persist, advancing the cursor
  ///
  /// On a transient remote failure nothing is persisted and the error
  /// carries the cache as it was loaded.
  pub async fn sync_at(
    &self,
    key: &CacheKey,
    mode: SyncMode,
    now: DateTime<Utc>,
  ) -> SyncResult<CacheResult<Cache>> {
    let cached = self.storage.load(key);
    if mode == SyncMode::Incremental && !self.is_stale(&cached, now) {
      debug!(%key, "Cache is fresh, skipping remote");
      let synced_at = cached.synced_at;
      return Ok(CacheResult::from_cache(cached, synced_at));
    }

    let mut start = cached.clone();
    if mode == SyncMode::Full {
      start.reset_position();
    }
    let cursor = if start.complete { start.cursor } else { None };
    let mut working = self.sweep(key, &cached, start, cursor, now).await?;

    if cursor.is_some() && self.needs_reconciliation(key, &working).await? {
      info!(%key, "Remote total differs from cache, listing full history");
      working = self.sweep(key, &cached, working, None, now).await?;
    }

    working.synced_at = Some(now);
    self.storage.save(key, &working)?;

    Ok(CacheResult::from_network(working))
  }

  /// Fetch from `cursor` and merge everything into `working`.
  ///
  /// `persisted` is the loaded cache, handed back inside `SyncIncomplete`.
  async fn sweep(
    &self,
    key: &CacheKey,
    persisted: &Cache,
    mut working: Cache,
    cursor: Option<Cursor>,
    now: DateTime<Utc>,
  ) -> SyncResult<Cache> {
    let authoritative = cursor.is_none();
    let mut stats = SweepStats::default();
    let mut seen: HashSet<u64> = HashSet::new();
    let mut newest = working.cursor;

    debug!(%key, ?cursor, "Fetching records");
    let mut records = self
      .remote
      .fetch(&key.repository, key.category, cursor);

    while let Some(item) = records.next().await {
      let raw = match item {
        Ok(raw) => raw,
        Err(RemoteError::Malformed(reason)) => {
          warn!(%key, %reason, "Skipping malformed record");
          stats.malformed += 1;
          continue;
        }
        Err(RemoteError::Transient(reason)) => {
          warn!(%key, %reason, merged = stats.fetched, "Sync aborted, cache left unchanged");
          return Err(SyncError::SyncIncomplete {
            key: key.to_string(),
            reason,
            cache: Box::new(persisted.clone()),
          });
        }
        Err(RemoteError::Permanent(reason)) => {
          return Err(SyncError::RemotePermanent {
            key: key.to_string(),
            reason,
          });
        }
      };

      stats.fetched += 1;
      seen.insert(raw.id);
      let position = Cursor::new(raw.cursor_position());

      match working.records.upsert(Record::observed(raw, now)) {
        Ok(Upsert::Inserted) => stats.inserted += 1,
        Ok(Upsert::Updated) => stats.updated += 1,
        Ok(Upsert::Unchanged) => {}
        Err(e) => {
          warn!(%key, error = %e, "Skipping invalid record");
          stats.skipped += 1;
          continue;
        }
      }
      newest = newest.max(Some(position));
    }

    if authoritative {
      // An undecodable item still has an id on the remote, so the listing
      // can't prove anything is gone
      if stats.malformed > 0 {
        warn!(
          %key,
          malformed = stats.malformed,
          "Listing had undecodable records, skipping reconciliation"
        );
      } else {
        let vanished: Vec<u64> = working.records.ids().filter(|id| !seen.contains(id)).collect();
        for id in vanished {
          if working.records.mark_absent_since(id, now) {
            stats.absent += 1;
          }
        }
      }
      working.complete = true;
    }
    // The cursor moves only after the whole listing was merged
    working.cursor = newest;

    info!(
      %key,
      fetched = stats.fetched,
      inserted = stats.inserted,
      updated = stats.updated,
      skipped = stats.skipped,
      malformed = stats.malformed,
      absent = stats.absent,
      full = authoritative,
      "Merged remote records"
    );
    Ok(working)
  }

  /// Whether an incremental sync could have missed removals.
  ///
  /// Only categories without closure reporting are checked, by comparing
  /// the remote's total with the records still present in the cache.
  async fn needs_reconciliation(&self, key: &CacheKey, working: &Cache) -> SyncResult<bool> {
    if key.category.reports_closures() {
      return Ok(false);
    }

    match self.remote.total_count(&key.repository, key.category).await {
      Ok(Some(total)) => Ok(total != working.records.present_count() as u64),
      Ok(None) => Ok(false),
      Err(RemoteError::Permanent(reason)) => Err(SyncError::RemotePermanent {
        key: key.to_string(),
        reason,
      }),
      Err(e) => {
        warn!(%key, error = %e, "Could not read remote total, skipping reconciliation");
        Ok(false)
      }
    }
  }
}

impl<S: CacheStorage, R: RemoteSource> Clone for CacheLayer<S, R> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      remote: Arc::clone(&self.remote),
      stale_time: self.stale_time,
    }
  }
}
