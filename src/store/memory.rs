//! In-process key-value store.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Batch, BatchOp, KvStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Entries = HashMap<String, Entry>;

/// Key-value store held entirely in memory.
///
/// Batches are applied to a scratch copy of the map which replaces the live
/// map only when every operation succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

fn live<'a>(entries: &'a Entries, key: &str, now: Instant) -> Option<&'a Entry> {
    entries.get(key).filter(|e| e.is_live(now))
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
    }
}

fn apply_op(entries: &mut Entries, op: &BatchOp, now: Instant) -> StoreResult<()> {
    match op {
        BatchOp::HSet { key, field, value } => {
            purge(entries, key, now);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(fields) => {
                    fields.insert(field.clone(), value.clone());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        }
        BatchOp::Set { key, value, ttl } => {
            entries.insert(
                key.clone(),
                Entry {
                    value: Value::Str(value.clone()),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
            Ok(())
        }
        BatchOp::SAdd { key, member } => {
            purge(entries, key, now);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(members) => {
                    members.insert(member.clone());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        }
        BatchOp::SRem { key, member } => {
            purge(entries, key, now);
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };
            let emptied = match &mut entry.value {
                Value::Set(members) => {
                    members.remove(member);
                    members.is_empty()
                }
                _ => return Err(wrong_type(key)),
            };
            if emptied {
                entries.remove(key);
            }
            Ok(())
        }
        BatchOp::Expire { key, ttl } => {
            purge(entries, key, now);
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(now + *ttl);
            }
            Ok(())
        }
        BatchOp::Del { key } => {
            entries.remove(key);
            Ok(())
        }
    }
}

fn purge(entries: &mut Entries, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

impl KvStore for MemoryStore {
    fn exists(&self, key: &str) -> StoreResult<bool> {
        let entries = self.lock()?;
        Ok(live(&entries, key, Instant::now()).is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.lock()?;
        match live(&entries, key, Instant::now()).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let entries = self.lock()?;
        match live(&entries, key, Instant::now()).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let entries = self.lock()?;
        match live(&entries, key, Instant::now()).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let entries = self.lock()?;
        match live(&entries, key, Instant::now()).map(|e| &e.value) {
            None => Ok(false),
            Some(Value::Set(members)) => Ok(members.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(live(&entries, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if live(&entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut entries = self.lock()?;
        let matches = live(&entries, key, Instant::now())
            .is_some_and(|e| matches!(&e.value, Value::Str(current) if current == value));
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn exec(&self, batch: &Batch) -> StoreResult<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let mut scratch = entries.clone();
        for op in batch.ops() {
            apply_op(&mut scratch, op, now)?;
        }
        *entries = scratch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn hash_fields_accumulate() {
        let store = MemoryStore::new();
        store
            .exec(&Batch::new().hset("h", "a", "1").hset("h", "b", "2"))
            .unwrap();
        let fields = store.hgetall("h").unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["a"], "1");
        assert!(store.exists("h").unwrap());
    }

    #[test]
    fn set_membership_is_idempotent_and_emptied_sets_vanish() {
        let store = MemoryStore::new();
        store.sadd("s", "x").unwrap();
        store.sadd("s", "x").unwrap();
        assert_eq!(store.smembers("s").unwrap(), vec!["x".to_owned()]);

        store.srem("s", "missing").unwrap();
        store.srem("s", "x").unwrap();
        assert!(!store.exists("s").unwrap());
        store.srem("s", "x").unwrap();
    }

    #[test]
    fn failed_batch_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.set("taken", "string", None).unwrap();

        let result = store.exec(&Batch::new().hset("h", "a", "1").sadd("taken", "m"));
        assert!(matches!(result, Err(StoreError::WrongType { .. })));
        assert!(!store.exists("h").unwrap());
        assert_eq!(store.get("taken").unwrap().as_deref(), Some("string"));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let store = MemoryStore::new();
        store
            .exec(&Batch::new().sadd("s", "x").expire("s", Duration::ZERO))
            .unwrap();
        assert!(!store.exists("s").unwrap());
        assert!(store.smembers("s").unwrap().is_empty());
    }

    #[test]
    fn set_nx_only_sets_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx("lock", "a", Some(Duration::from_secs(30))).unwrap());
        assert!(!store.set_nx("lock", "b", None).unwrap());
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("a"));
        assert!(store.ttl("lock").unwrap().is_some());

        assert!(store.del("lock").unwrap());
        assert!(store.set_nx("lock", "b", None).unwrap());
    }

    #[test]
    fn del_if_eq_only_removes_the_matching_value() {
        let store = MemoryStore::new();
        store.set("lock", "mine", None).unwrap();
        assert!(!store.del_if_eq("lock", "theirs").unwrap());
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("mine"));

        assert!(store.del_if_eq("lock", "mine").unwrap());
        assert!(!store.exists("lock").unwrap());
        assert!(!store.del_if_eq("lock", "mine").unwrap());

        store.sadd("s", "mine").unwrap();
        assert!(!store.del_if_eq("s", "mine").unwrap());
        assert!(store.exists("s").unwrap());
    }

    #[test]
    fn del_if_eq_ignores_an_expired_value() {
        let store = MemoryStore::new();
        store.set("lock", "mine", Some(Duration::ZERO)).unwrap();
        assert!(!store.del_if_eq("lock", "mine").unwrap());
    }

    #[test]
    fn reading_wrong_kind_is_an_error() {
        let store = MemoryStore::new();
        store.sadd("s", "x").unwrap();
        assert!(store.get("s").is_err());
        assert!(store.hgetall("s").is_err());
    }
}
