use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
/// Enumerates supported `StateStoreError` values.
pub enum StateStoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("state store returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid state store configuration: {0}")]
    InvalidConfig(String),
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
/// Trait contract for the key-value service that holds conversation state.
///
/// Expiry is the backend's responsibility: once `ttl` has elapsed after a
/// `set`, `get` for that key must report a miss.
pub trait StateBackend: Send + Sync {
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StateStoreError>;

    /// Returns the raw JSON text stored under `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError>;
}

#[derive(Debug)]
struct MemoryEntry {
    raw: String,
    // `None` when the ttl reaches past the clock's range.
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
/// Process-local [`StateBackend`] with per-entry expiry.
pub struct MemoryStateBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw text as-is, bypassing JSON encoding.
    ///
    /// Every insert also sweeps entries whose ttl has elapsed, so keys that
    /// are never read again do not accumulate.
    pub fn insert_raw(&self, key: &str, raw: &str, ttl: Duration) -> Result<(), StateStoreError> {
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        let swept = sweep_expired(&mut entries, now);
        if swept > 0 {
            tracing::debug!(swept, "expired memory state entries removed");
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                raw: raw.to_string(),
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StateStoreError> {
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        Ok(sweep_expired(&mut entries, now))
    }

    pub fn len(&self) -> Result<usize, StateStoreError> {
        Ok(self.lock_entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StateStoreError> {
        Ok(self.lock_entries()?.is_empty())
    }

    fn lock_entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, StateStoreError> {
        self.entries
            .lock()
            .map_err(|_| StateStoreError::Unavailable("memory state lock is poisoned".to_string()))
    }
}

fn sweep_expired(entries: &mut HashMap<String, MemoryEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), StateStoreError> {
        let raw = serde_json::to_string(value)?;
        self.insert_raw(key, &raw, ttl)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.raw.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
