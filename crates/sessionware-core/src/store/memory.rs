//! In-memory session store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::{DEFAULT_SWEEP_INTERVAL, SessionStore, StoreOptions};
use crate::error::Result;
use crate::options::MaxAge;

#[derive(Debug, Clone)]
struct StoreEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Entries {
    map: HashMap<String, StoreEntry>,
    last_sweep: Instant,
}

impl Entries {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        self.last_sweep = now;
        before - self.map.len()
    }
}

/// Process-local session store.
///
/// Suitable for development or single-instance deployments; entries are lost
/// on restart. Expired entries are evicted when read and swept from `set` at
/// most once per sweep interval.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    sweep_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Store that sweeps expired entries at most once per `interval`
    pub fn with_sweep_interval(interval: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            sweep_interval: interval,
        }
    }

    /// Number of stored entries, expired ones included until purged
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        self.entries.write().await.sweep(Instant::now())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str, _max_age: MaxAge, _opts: StoreOptions) -> Result<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: evict
        self.entries.write().await.map.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        max_age: MaxAge,
        _opts: StoreOptions,
    ) -> Result<String> {
        let now = Instant::now();
        // Too far out to represent means no expiry
        let expires_at = max_age.duration().and_then(|d| now.checked_add(d));

        let mut entries = self.entries.write().await;
        if now.duration_since(entries.last_sweep) >= self.sweep_interval {
            let removed = entries.sweep(now);
            if removed > 0 {
                debug!(removed, "swept expired sessions");
            }
        }
        entries.map.insert(key.to_string(), StoreEntry { value, expires_at });
        Ok(key.to_string())
    }

    async fn destroy(&self, key: &str, _opts: StoreOptions) -> Result<()> {
        self.entries.write().await.map.remove(key);
        Ok(())
    }
}
