//! Cache storage trait with file, SQLite and no-op implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::{Cache, CacheKey};
use crate::error::{SyncError, SyncResult};

/// Version written into every persisted artifact.
pub const FORMAT_VERSION: u32 = 1;

/// On-disk envelope around a [`Cache`].
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
  #[serde(default)]
  format_version: u32,
  #[serde(default)]
  key: String,
  #[serde(flatten)]
  cache: Cache,
}

fn encode(key: &CacheKey, cache: &Cache) -> SyncResult<Vec<u8>> {
  let document = CacheDocument {
    format_version: FORMAT_VERSION,
    key: key.to_string(),
    cache: cache.clone(),
  };
  serde_json::to_vec_pretty(&document).map_err(|e| SyncError::storage(key, e))
}

fn decode(key: &CacheKey, data: &[u8]) -> SyncResult<Cache> {
  serde_json::from_slice::<CacheDocument>(data)
    .map(|document| document.cache)
    .map_err(|e| SyncError::corrupt(key, e))
}

/// Trait for cache storage backends.
///
/// Each key is loaded and saved as one unit; saving one key never touches
/// another key's artifact.
pub trait CacheStorage: Send + Sync {
  /// Load the stored cache, `Ok(None)` if nothing was stored yet.
  fn try_load(&self, key: &CacheKey) -> SyncResult<Option<Cache>>;

  /// Replace the stored cache for `key` atomically.
  fn save(&self, key: &CacheKey, cache: &Cache) -> SyncResult<()>;

  /// Load the stored cache, falling back to an empty one.
  ///
  /// A corrupt artifact is logged and treated as if it did not exist.
  fn load(&self, key: &CacheKey) -> Cache {
    match self.try_load(key) {
      Ok(Some(cache)) => cache,
      Ok(None) => Cache::default(),
      Err(e) => {
        warn!(%key, error = %e, "Discarding unreadable cache");
        Cache::default()
      }
    }
  }
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn try_load(&self, key: &CacheKey) -> SyncResult<Option<Cache>> {
    (**self).try_load(key)
  }

  fn save(&self, key: &CacheKey, cache: &Cache) -> SyncResult<()> {
    (**self).save(key, cache)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn try_load(&self, _key: &CacheKey) -> SyncResult<Option<Cache>> {
    Ok(None) // Always miss
  }

  fn save(&self, _key: &CacheKey, _cache: &Cache) -> SyncResult<()> {
    Ok(()) // Discard
  }
}

/// JSON files under a root directory, one per key.
pub struct FileStorage {
  root: PathBuf,
}

impl FileStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn path_for(&self, key: &CacheKey) -> PathBuf {
    self.root.join(key.relative_path())
  }

  /// Write `data` to a sibling temp file, fsync it, rename it over `path`,
  /// then fsync the directory so the rename itself is durable.
  fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    let temp_path = path.with_file_name(
      path
        .file_name()
        .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
        .unwrap_or_else(|| temp_name.clone()),
    );

    let written = (|| {
      let mut file = fs::File::create(&temp_path)?;
      file.write_all(data)?;
      file.sync_all()?;
      fs::rename(&temp_path, path)
    })();

    if written.is_err() {
      let _ = fs::remove_file(&temp_path);
      return written;
    }
    sync_parent(path)
  }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
  match path.parent().filter(|p| !p.as_os_str().is_empty()) {
    Some(parent) => fs::File::open(parent)?.sync_all(),
    None => Ok(()),
  }
}

// Directories can't be opened for syncing here
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

impl CacheStorage for FileStorage {
  fn try_load(&self, key: &CacheKey) -> SyncResult<Option<Cache>> {
    let path = self.path_for(key);
    let data = match fs::read(&path) {
      Ok(data) => data,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(SyncError::corrupt(key, e)),
    };

    debug!(%key, path = %path.display(), bytes = data.len(), "Loaded cache file");
    decode(key, &data).map(Some)
  }

  fn save(&self, key: &CacheKey, cache: &Cache) -> SyncResult<()> {
    let path = self.path_for(key);
    let data = encode(key, cache)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| {
        SyncError::storage(key, format!("creating {}: {}", parent.display(), e))
      })?;
    }

    Self::write_atomic(&path, &data)
      .map_err(|e| SyncError::storage(key, format!("writing {}: {}", path.display(), e)))?;

    debug!(%key, path = %path.display(), records = cache.records.len(), "Saved cache file");
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// In-memory database, nothing survives the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self, key: &CacheKey) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::storage(key, format!("lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One serialized cache per (repository, category)
CREATE TABLE IF NOT EXISTS stats_cache (
    key_hash TEXT PRIMARY KEY,
    key_description TEXT NOT NULL,
    data BLOB NOT NULL,
    record_count INTEGER NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn try_load(&self, key: &CacheKey) -> SyncResult<Option<Cache>> {
    let conn = self.lock(key)?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM stats_cache WHERE key_hash = ?",
        params![key.cache_hash()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| SyncError::corrupt(key, e))?;

    data.map(|data| decode(key, &data)).transpose()
  }

  fn save(&self, key: &CacheKey, cache: &Cache) -> SyncResult<()> {
    let data = encode(key, cache)?;
    let saved_at: DateTime<Utc> = Utc::now();
    let conn = self.lock(key)?;

    // Single statement, replaced atomically by SQLite
    conn
      .execute(
        "INSERT OR REPLACE INTO stats_cache (key_hash, key_description, data, record_count, saved_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          key.cache_hash(),
          key.to_string(),
          data,
          cache.records.len() as i64,
          saved_at.to_rfc3339()
        ],
      )
      .map_err(|e| SyncError::storage(key, e))?;

    Ok(())
  }
}
