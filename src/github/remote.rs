//! Contract between the sync engine and a remote record source.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;

use super::types::{Category, Cursor, RawRecord, RepoName};

/// Failures reported by a remote source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  /// Rate limits, timeouts, server errors; retrying later may succeed
  #[error("transient remote failure: {0}")]
  Transient(String),
  /// Repository missing or access refused
  #[error("{0}")]
  Permanent(String),
  /// A single item could not be decoded; the sequence continues
  #[error("malformed remote record: {0}")]
  Malformed(String),
}

/// A source of historical records for a repository.
pub trait RemoteSource: Send + Sync {
  /// Lazily list records for `category`.
  ///
  /// Without a cursor the sequence is the complete current listing. With a
  /// cursor it contains at least every record positioned at or after it.
  /// Items may repeat or arrive out of order. Each call starts a new pass.
  fn fetch<'a>(
    &'a self,
    repo: &'a RepoName,
    category: Category,
    cursor: Option<Cursor>,
  ) -> BoxStream<'a, Result<RawRecord, RemoteError>>;

  /// Number of records the remote currently lists, when it is cheap to know.
  fn total_count<'a>(
    &'a self,
    repo: &'a RepoName,
    category: Category,
  ) -> BoxFuture<'a, Result<Option<u64>, RemoteError>>;
}
