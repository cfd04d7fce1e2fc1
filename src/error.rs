//! Error types for cache synchronisation.

use thiserror::Error;

use crate::cache::Cache;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while loading, merging or persisting a cache.
#[derive(Debug, Error)]
pub enum SyncError {
  /// A record violates the store invariants; it is skipped, the sync continues
  #[error("invalid record {id}: {reason}")]
  InvalidRecord { id: u64, reason: String },

  /// The remote failed transiently mid-fetch; `cache` is the last persisted state
  #[error("sync of {key} incomplete: {reason}")]
  SyncIncomplete {
    key: String,
    reason: String,
    cache: Box<Cache>,
  },

  /// The persisted artifact could not be decoded
  #[error("cache for {key} is unreadable: {reason}")]
  CacheCorrupt { key: String, reason: String },

  /// The repository is missing or access was refused
  #[error("{key}: {reason}")]
  RemotePermanent { key: String, reason: String },

  /// Writing the cache failed; the previous artifact is left in place
  #[error("failed to persist cache for {key}: {reason}")]
  Storage { key: String, reason: String },
}

impl SyncError {
  pub fn invalid_record(id: u64, reason: impl Into<String>) -> Self {
    Self::InvalidRecord {
      id,
      reason: reason.into(),
    }
  }

  pub fn corrupt(key: impl ToString, reason: impl ToString) -> Self {
    Self::CacheCorrupt {
      key: key.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn storage(key: impl ToString, reason: impl ToString) -> Self {
    Self::Storage {
      key: key.to_string(),
      reason: reason.to_string(),
    }
  }

  /// Whether retrying the same request later may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::SyncIncomplete { .. } | Self::Storage { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_messages() {
    let error = SyncError::invalid_record(7, "closed before it was created");
    assert_eq!(error.to_string(), "invalid record 7: closed before it was created");

    let error = SyncError::corrupt("stars:owner/repo", "expected value at line 1");
    assert_eq!(
      error.to_string(),
      "cache for stars:owner/repo is unreadable: expected value at line 1"
    );
  }

  #[test]
  fn test_retryable() {
    let incomplete = SyncError::SyncIncomplete {
      key: "issues:owner/repo".to_string(),
      reason: "rate limited".to_string(),
      cache: Box::default(),
    };
    assert!(incomplete.is_retryable());

    let permanent = SyncError::RemotePermanent {
      key: "issues:owner/repo".to_string(),
      reason: "repository not found".to_string(),
    };
    assert!(!permanent.is_retryable());
  }
}
