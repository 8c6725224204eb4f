//! Key/value persistence behind the [`Persistence`] trait.
//!
//! Client state (session, cached lists, taxonomy) is mirrored here so a
//! process restart can restore without refetching. The trait makes the
//! invalidation scan (`keys_with_prefix`) a defined operation instead of an
//! environment-specific global key walk, and lets tests swap in an
//! in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ── trait ────────────────────────────────────────────────────────────

/// Durable key/value storage surviving process restart.
///
/// Values are opaque strings; callers serialize their own JSON. Writes are
/// upserts. Keys are namespaced with `/`-separated prefixes by convention
/// (e.g. `session/auth`, `threads/list/...`).
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Get a value by key, returning `None` if not found.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value for a key (insert or update).
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key, returning `true` if it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Return every stored key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// ── sqlite implementation ────────────────────────────────────────────

/// SQLite-backed [`Persistence`] over the `kv` table.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Create a new store backed by `db`. The database must be migrated.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT value FROM kv WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                );
                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = chrono::Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     updated_at = excluded.updated_at",
                    rusqlite::params![key, value, now],
                )?;
                debug!(key = %key, "kv set");
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
                Ok(deleted > 0)
            })
            .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.db
            .execute(move |conn| {
                // substr comparison avoids LIKE wildcard escaping for keys
                // that contain `%` or `_`.
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(rusqlite::params![prefix], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
    }
}

// ── in-memory implementation ─────────────────────────────────────────

/// In-memory [`Persistence`] for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ── tests ────────────────────────────────────────────────────────────
