//! In-process implementation of [`KeyedStore`] for single-node mode and tests

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::KeyedStore;
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Keyed store held in memory
///
/// An expired entry is dropped the next time it is read or written, or by
/// the sweeper started with [`MemoryStore::start_sweeper`], whichever comes
/// first. Cloning shares the underlying map.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl MemoryStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Number of live keys
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Spawn a task purging expired entries every `period` until `cancel`
    /// fires
    #[must_use]
    pub fn start_sweeper(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.entries.lock().len(), "Purged expired keys");
                }
            }
        })
    }

    /// Run `f` on the live value at `key`, creating it with `init` when
    /// absent or expired. `f` is told whether the value is fresh. The TTL is
    /// refreshed.
    fn write<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value, bool) -> Result<T>,
    ) -> Result<T> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let (entry, fresh) = match entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                let expired = entry.expires_at <= now;
                if expired {
                    entry.value = init();
                }
                (entry, expired)
            }
            MapEntry::Vacant(vacant) => (
                vacant.insert(Entry {
                    value: init(),
                    expires_at: now,
                }),
                true,
            ),
        };

        entry.expires_at = now + self.ttl;
        f(&mut entry.value, fresh)
    }

    /// Run `f` on the live value at `key`, or return `None` when absent
    fn read<T>(&self, key: &str, f: impl FnOnce(&Value) -> T) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = entries.get(key)?.expires_at <= now;
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| f(&entry.value))
    }
}

fn empty_string() -> Value {
    Value::Str(String::new())
}

fn wrong_type(key: &str) -> Error {
    Error::Store(format!("wrong value type at key {key}"))
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key, |value| match value {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(wrong_type(key)),
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, empty_string, |slot, _| {
            *slot = Value::Str(value.to_string());
            Ok(())
        })
    }

    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.write(key, empty_string, |slot, fresh| {
            let previous = std::mem::replace(slot, Value::Str(value.to_string()));
            match previous {
                _ if fresh => Ok(None),
                Value::Str(s) => Ok(Some(s)),
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.write(
            key,
            || Value::Str("0".to_string()),
            |slot, _| match slot {
                Value::Str(s) => {
                    let current: i64 = s
                        .parse()
                        .map_err(|_| Error::Store(format!("value at {key} is not an integer")))?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.write(
            key,
            || Value::Set(HashSet::new()),
            |slot, _| match slot {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => match &mut entry.value {
                Value::Set(set) => {
                    entry.expires_at = now + self.ttl;
                    Ok(set.remove(member))
                }
                _ => Err(wrong_type(key)),
            },
            _ => Ok(false),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.read(key, |value| match value {
            Value::Set(set) => Ok(set.iter().cloned().collect()),
            _ => Err(wrong_type(key)),
        })
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        self.read(key, |value| match value {
            Value::Set(set) => Ok(set.len()),
            _ => Err(wrong_type(key)),
        })
        .unwrap_or(Ok(0))
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        self.read(key, |value| match value {
            Value::Set(set) => Ok(set.contains(member)),
            _ => Err(wrong_type(key)),
        })
        .unwrap_or(Ok(false))
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |slot, _| match slot {
                Value::Hash(hash) => {
                    hash.extend(fields);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read(key, |value| match value {
            Value::Hash(hash) => Ok(hash.get(field).cloned()),
            _ => Err(wrong_type(key)),
        })
        .unwrap_or(Ok(None))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read(key, |value| match value {
            Value::Hash(hash) => Ok(hash.clone()),
            _ => Err(wrong_type(key)),
        })
        .unwrap_or_else(|| Ok(HashMap::new()))
    }
}
