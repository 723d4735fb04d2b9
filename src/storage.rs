//! Persisted key/value storage for client state that must survive restarts:
//! the auth token and the locally saved job ids.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::api::types::EntityId;
use crate::error::{ApiError, Result};

pub const TOKEN_KEY: &str = "token";
pub const SAVED_JOBS_KEY: &str = "np_saved_jobs";

/// Synchronous string key/value store.
pub trait LocalStorage: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;
  fn set_item(&self, key: &str, value: &str) -> Result<()>;
  fn remove_item(&self, key: &str) -> Result<()>;
}

/// Non-persistent storage, used when no database path is available and in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
    self
      .items
      .lock()
      .map_err(|e| ApiError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl LocalStorage for MemoryStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }
}

/// Schema for the key/value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        ApiError::Storage(format!("Failed to create storage directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ApiError::Storage(format!(
        "Failed to open storage database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| ApiError::Storage(format!("Failed to run storage migrations: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database location under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ApiError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("nomad").join("storage.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| ApiError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl LocalStorage for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO local_storage (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM local_storage WHERE key = ?", params![key])?;
    Ok(())
  }
}

/// Job ids bookmarked on this device, persisted under `np_saved_jobs` as a
/// JSON array and rewritten on every change.
#[derive(Clone)]
pub struct SavedJobIds {
  storage: Arc<dyn LocalStorage>,
}

impl SavedJobIds {
  pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
    Self { storage }
  }

  /// Stored ids. A missing or corrupt entry reads as an empty list.
  pub fn list(&self) -> Vec<EntityId> {
    let raw = match self.storage.get_item(SAVED_JOBS_KEY) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Vec::new(),
      Err(e) => {
        warn!(error = %e, "failed to read saved jobs");
        return Vec::new();
      }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
      warn!(error = %e, "ignoring corrupt saved jobs entry");
      Vec::new()
    })
  }

  pub fn contains(&self, id: &EntityId) -> bool {
    self.list().contains(id)
  }

  /// Add the id if absent, remove it if present. Returns whether it is saved
  /// afterwards.
  pub fn toggle(&self, id: &EntityId) -> Result<bool> {
    let mut ids = self.list();
    let saved = if let Some(pos) = ids.iter().position(|existing| existing == id) {
      ids.remove(pos);
      false
    } else {
      ids.push(id.clone());
      true
    };

    self
      .storage
      .set_item(SAVED_JOBS_KEY, &serde_json::to_string(&ids)?)?;
    debug!(%id, saved, "toggled saved job");
    Ok(saved)
  }
}
