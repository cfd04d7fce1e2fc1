//! Persistent record cache with incremental synchronisation.
//!
//! This module provides the caching mechanism that:
//! - Keeps one record store per (repository, category), unique by id
//! - Persists each store atomically as a single unit
//! - Supports incremental fetching via a cursor advanced only after a full merge
//! - Reconciles records that silently vanished from a complete listing
//! - Serves the last persisted cache when the remote is unavailable

mod layer;
mod storage;
mod store;
mod traits;

pub use layer::{CacheLayer, SyncMode};
pub use storage::{CacheStorage, FileStorage, NoopStorage, SqliteStorage, FORMAT_VERSION};
pub use store::{Record, RecordStore, Upsert, CLOCK_SKEW_TOLERANCE_SECS};
pub use traits::{Cache, CacheKey, CacheResult, CacheSource};
