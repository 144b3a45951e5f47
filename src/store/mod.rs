//! Key-value store abstraction.
//!
//! Every component receives its store explicitly (`Arc<S>` with
//! `S: KvStore`). The trait mirrors the small Redis subset the schema needs:
//! flat string values, hashes of string fields, sets of strings, per-key
//! expiry, set-if-absent, and all-or-nothing write batches.
//!
//! Sub-modules:
//! - `memory`: in-process `MemoryStore`.
//! - `schema`: SQLite DDL definitions.
//! - `sqlite`: SQLite-backed `SqliteStore`.

pub mod memory;
pub(crate) mod schema;
pub mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store-level failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set one field of a hash. Keeps an existing expiry.
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Replace a string value, with an optional expiry.
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Add a member to a set. Keeps an existing expiry.
    SAdd { key: String, member: String },
    /// Remove a member from a set; an emptied set is deleted.
    SRem { key: String, member: String },
    /// Set the expiry of an existing key. No-op for a missing key.
    Expire { key: String, ttl: Duration },
    /// Delete a key of any kind.
    Del { key: String },
}

/// Ordered list of writes applied atomically by [`KvStore::exec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(mut self, key: impl Into<String>, field: &str, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::HSet {
            key: key.into(),
            field: field.to_owned(),
            value: value.into(),
        });
        self
    }

    pub fn set(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn sadd(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(BatchOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Del { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Synchronous key-value store used by every component.
///
/// Implementations must treat expired keys as absent and must apply a
/// [`Batch`] all-or-nothing.
pub trait KvStore: Send + Sync {
    /// Whether `key` currently holds a value of any kind.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Read a string value.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Read every field of a hash. Missing key yields an empty map.
    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Read every member of a set in ascending order.
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Whether `member` belongs to the set at `key`.
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remaining lifetime of `key`, `None` when missing or persistent.
    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Set a string value only if `key` is absent. Returns `true` when set.
    fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Delete `key`. Returns `true` when something was removed.
    fn del(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` only while it holds the string `value`, checked and
    /// removed in one step. Returns `true` when removed.
    fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Apply all operations of `batch` atomically.
    fn exec(&self, batch: &Batch) -> StoreResult<()>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.exec(&Batch::new().set(key, value, ttl))
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.exec(&Batch::new().sadd(key, member))
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        self.exec(&Batch::new().srem(key, member))
    }
}
