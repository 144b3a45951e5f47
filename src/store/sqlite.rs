//! SQLite-backed key-value store.
//!
//! Keys live in `kv_keys` with their kind and expiry; hash fields and set
//! members hang off the key in their own tables. Expired keys are purged
//! lazily whenever they are touched, and in bulk by [`SqliteStore::purge_expired`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::{Batch, BatchOp, KvStore, StoreError, StoreResult};

/// Database filename within the data directory.
const DB_FILENAME: &str = "rollcall.db";

/// How long a writer waits for another connection's lock on the file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const KIND_STRING: &str = "string";
const KIND_HASH: &str = "hash";
const KIND_SET: &str = "set";

/// SQLite-backed key-value store.
///
/// Thread-safe via an internal `Mutex<Connection>`; every operation,
/// including reads that purge expired keys, is serialized.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `{root_dir}/rollcall.db`.
    pub fn new(root_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root_dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Self::open(&root_dir.join(DB_FILENAME))
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> StoreResult<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Delete every expired key. Returns the number of keys removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM kv_hash_fields WHERE key IN \
             (SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
            params![now],
        )?;
        tx.execute(
            "DELETE FROM kv_set_members WHERE key IN \
             (SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
            params![now],
        )?;
        let removed = tx.execute(
            "DELETE FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_at(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
    }
}

fn delete_key(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM kv_hash_fields WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM kv_set_members WHERE key = ?1", params![key])?;
    let removed = conn.execute("DELETE FROM kv_keys WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

/// Kind of the live value at `key`, purging it first when expired.
fn live_kind(conn: &Connection, key: &str, now: i64) -> rusqlite::Result<Option<String>> {
    let row: Option<(String, Option<i64>)> = conn
        .query_row(
            "SELECT kind, expires_at FROM kv_keys WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((_, Some(expires_at))) if expires_at <= now => {
            delete_key(conn, key)?;
            Ok(None)
        }
        Some((kind, _)) => Ok(Some(kind)),
        None => Ok(None),
    }
}

/// Make sure `key` holds a container of `kind`, creating it when absent.
fn ensure_kind(conn: &Connection, key: &str, kind: &str, now: i64) -> StoreResult<()> {
    match live_kind(conn, key, now)? {
        Some(existing) if existing == kind => Ok(()),
        Some(_) => Err(wrong_type(key)),
        None => {
            conn.execute(
                "INSERT INTO kv_keys (key, kind, value, expires_at) VALUES (?1, ?2, NULL, NULL)",
                params![key, kind],
            )?;
            Ok(())
        }
    }
}

fn apply_op(conn: &Connection, op: &BatchOp, now: i64) -> StoreResult<()> {
    match op {
        BatchOp::HSet { key, field, value } => {
            ensure_kind(conn, key, KIND_HASH, now)?;
            conn.execute(
                "INSERT OR REPLACE INTO kv_hash_fields (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )?;
        }
        BatchOp::Set { key, value, ttl } => {
            delete_key(conn, key)?;
            conn.execute(
                "INSERT INTO kv_keys (key, kind, value, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![key, KIND_STRING, value, ttl.map(|ttl| expiry_at(now, ttl))],
            )?;
        }
        BatchOp::SAdd { key, member } => {
            ensure_kind(conn, key, KIND_SET, now)?;
            conn.execute(
                "INSERT OR IGNORE INTO kv_set_members (key, member) VALUES (?1, ?2)",
                params![key, member],
            )?;
        }
        BatchOp::SRem { key, member } => match live_kind(conn, key, now)?.as_deref() {
            None => {}
            Some(KIND_SET) => {
                conn.execute(
                    "DELETE FROM kv_set_members WHERE key = ?1 AND member = ?2",
                    params![key, member],
                )?;
                let remaining: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM kv_set_members WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )?;
                if remaining == 0 {
                    delete_key(conn, key)?;
                }
            }
            Some(_) => return Err(wrong_type(key)),
        },
        BatchOp::Expire { key, ttl } => {
            if live_kind(conn, key, now)?.is_some() {
                conn.execute(
                    "UPDATE kv_keys SET expires_at = ?2 WHERE key = ?1",
                    params![key, expiry_at(now, *ttl)],
                )?;
            }
        }
        BatchOp::Del { key } => {
            delete_key(conn, key)?;
        }
    }
    Ok(())
}

impl KvStore for SqliteStore {
    fn exists(&self, key: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        Ok(live_kind(&conn, key, now_ms())?.is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        match live_kind(&conn, key, now_ms())?.as_deref() {
            None => Ok(None),
            Some(KIND_STRING) => Ok(conn.query_row(
                "SELECT value FROM kv_keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let conn = self.lock()?;
        match live_kind(&conn, key, now_ms())?.as_deref() {
            None => Ok(HashMap::new()),
            Some(KIND_HASH) => {
                let mut stmt =
                    conn.prepare("SELECT field, value FROM kv_hash_fields WHERE key = ?1")?;
                let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut fields = HashMap::new();
                for r in rows {
                    let (field, value): (String, String) = r?;
                    fields.insert(field, value);
                }
                Ok(fields)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        match live_kind(&conn, key, now_ms())?.as_deref() {
            None => Ok(Vec::new()),
            Some(KIND_SET) => {
                let mut stmt = conn.prepare(
                    "SELECT member FROM kv_set_members WHERE key = ?1 ORDER BY member ASC",
                )?;
                let rows = stmt.query_map(params![key], |row| row.get(0))?;
                let mut members = Vec::new();
                for r in rows {
                    members.push(r?);
                }
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        match live_kind(&conn, key, now_ms())?.as_deref() {
            None => Ok(false),
            Some(KIND_SET) => {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM kv_set_members WHERE key = ?1 AND member = ?2",
                        params![key, member],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let conn = self.lock()?;
        let now = now_ms();
        if live_kind(&conn, key, now)?.is_none() {
            return Ok(None);
        }
        let expires_at: Option<i64> = conn.query_row(
            "SELECT expires_at FROM kv_keys WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(expires_at.map(|at| Duration::from_millis(u64::try_from(at - now).unwrap_or(0))))
    }

    fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        if live_kind(&tx, key, now)?.is_some() {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO kv_keys (key, kind, value, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, KIND_STRING, value, ttl.map(|ttl| expiry_at(now, ttl))],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let existed = live_kind(&conn, key, now_ms())?.is_some();
        delete_key(&conn, key)?;
        Ok(existed)
    }

    fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM kv_keys WHERE key = ?1 AND kind = ?2 AND value = ?3 \
             AND (expires_at IS NULL OR expires_at > ?4)",
            params![key, KIND_STRING, value, now_ms()],
        )?;
        Ok(removed > 0)
    }

    fn exec(&self, batch: &Batch) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        for op in batch.ops() {
            apply_op(&tx, op, now)?;
        }
        tx.commit()?;
        Ok(())
    }
}
