//! In-process store for development and tests. Not shared across processes.

use super::CoordinationStore;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Entry>,
    sets: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self.values.get(key).is_some_and(|e| !e.is_live(now));
        if expired {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, crate::Error> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, crate::Error> {
        let now = Instant::now();
        let mut inner = self.lock();
        let owned = inner.live(key, now).is_some_and(|e| e.value == value);
        if owned {
            inner.values.remove(key);
        }
        Ok(owned)
    }

    async fn renew_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, crate::Error> {
        let now = Instant::now();
        match self.lock().live(key, now) {
            Some(entry) if entry.value == value => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, crate::Error> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = inner.live(key, now) {
            let count = entry
                .value
                .parse::<u64>()
                .map_err(|e| crate::Error::Store(format!("counter {key} is not numeric: {e}")))?
                + 1;
            entry.value = count.to_string();
            return Ok(count);
        }
        inner.values.insert(
            key.to_string(),
            Entry {
                value: "1".into(),
                expires_at: Some(now + window),
            },
        );
        Ok(1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error> {
        let now = Instant::now();
        Ok(self.lock().live(key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), crate::Error> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.lock().values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result<(), crate::Error> {
        self.lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_from_set(&self, set: &str, member: &str) -> Result<(), crate::Error> {
        if let Some(members) = self.lock().sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, crate::Error> {
        Ok(self
            .lock()
            .sets
            .get(set)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }
}
