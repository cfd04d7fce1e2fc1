//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use super::store::RecordStore;
use crate::github::{Category, Cursor, RepoName};

/// Identifies one cache: a repository and a statistic category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub repository: RepoName,
  pub category: Category,
}

impl CacheKey {
  pub fn new(repository: RepoName, category: Category) -> Self {
    Self {
      repository,
      category,
    }
  }

  /// SHA256 of the key description, for stable fixed-length row keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Path of the artifact relative to a cache root: `owner/repo/category.json`.
  pub fn relative_path(&self) -> PathBuf {
    PathBuf::from(self.repository.owner())
      .join(self.repository.name())
      .join(format!("{}.json", self.category))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.category, self.repository)
  }
}

/// Persisted state for one cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
  /// Resumption point for the next incremental fetch
  #[serde(default)]
  pub cursor: Option<Cursor>,
  /// True once a full historical sweep has completed
  #[serde(default)]
  pub complete: bool,
  /// When the last successful sync finished
  #[serde(default)]
  pub synced_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub records: RecordStore,
}

impl Cache {
  /// Forget the sync position so the next sync lists the full history.
  ///
  /// Known records are kept and merged with the fresh listing.
  pub fn reset_position(&mut self) {
    self.cursor = None;
    self.complete = false;
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was last synced (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from freshly synced data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data that needed no sync.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Synced with the remote during this request
  Network,
  /// Served from cache, recent enough to skip the remote
  CacheFresh,
  /// Remote failed transiently, serving the last persisted cache
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(category: Category) -> CacheKey {
    CacheKey::new(RepoName::parse("owner/repo").unwrap(), category)
  }

  #[test]
  fn test_key_display_and_path() {
    let key = key(Category::Stars);
    assert_eq!(key.to_string(), "stars:owner/repo");
    assert_eq!(key.relative_path(), PathBuf::from("owner/repo/stars.json"));
  }

  #[test]
  fn test_cache_hash_is_stable_and_distinct() {
    let stars = key(Category::Stars);
    assert_eq!(stars.cache_hash(), key(Category::Stars).cache_hash());
    assert_ne!(stars.cache_hash(), key(Category::Issues).cache_hash());
    assert_eq!(stars.cache_hash().len(), 64);
  }

  #[test]
  fn test_unknown_fields_are_ignored() {
    let json = r#"{"cursor": null, "complete": true, "records": [], "future_field": 1}"#;
    let cache: Cache = serde_json::from_str(json).unwrap();
    assert!(cache.complete);
    assert!(cache.records.is_empty());
  }
}
