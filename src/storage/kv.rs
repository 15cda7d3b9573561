use super::CoordinationStore;
use crate::core::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct KvEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory coordination store with per-key expiry
///
/// Expiry uses the tokio clock so paused-time tests can step past a TTL.
/// Expired entries are purged lazily by whichever call touches them next.
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    entries: Arc<Mutex<HashMap<String, KvEntry>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Number of live keys.
    pub async fn live_keys(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, KvEntry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut KvEntry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = live_entry(&mut entries, key, now).is_some_and(|entry| entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
