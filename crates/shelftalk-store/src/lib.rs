//! # shelftalk-store
//!
//! Durable key/value persistence for the shelftalk client.
//!
//! Provides SQLite-backed storage with WAL mode, versioned migrations, and
//! the [`Persistence`] trait that the session manager and resource caches
//! mirror their state through. An in-memory implementation backs tests and
//! ephemeral runs.
//!
//! ## Quick start
//!
//! ```ignore
//! use shelftalk_store::{Database, Persistence, SqliteStore};
//!
//! let db = Database::open_and_migrate("data/shelftalk.db").await?;
//! let store = SqliteStore::new(db);
//! store.set("session/auth", "{\"token\":\"\"}").await?;
//! ```

pub mod db;
pub mod error;
pub mod kv;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use kv::{MemoryStore, Persistence, SqliteStore};
