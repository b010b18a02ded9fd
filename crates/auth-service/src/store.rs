//! Ephemeral key/value store with per-entry TTL.
//!
//! Holds one-time code digests, login-attempt counters and the refresh
//! revocation list. An entry is invisible to every operation once its expiry
//! has passed; the purge task only reclaims memory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Key namespaces.
pub mod keys {
    pub fn otp(subject_id: &str) -> String {
        format!("otp:{subject_id}")
    }

    pub fn login_attempts(subject_id: &str) -> String {
        format!("login-attempts:{subject_id}")
    }

    pub fn revoked_refresh(jti: &str) -> String {
        format!("revoked-refresh:{jti}")
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value at {0} is not a counter")]
    NotACounter(String),
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Insert or overwrite `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Insert `key` only if no live entry exists. Returns whether it was inserted.
    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove and return a live entry.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Increment the counter at `key` and return the new count.
    ///
    /// A missing or expired counter starts at 1 with expiry `now + ttl`;
    /// later increments keep the original expiry (fixed window).
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Drop expired entries. Returns how many were dropped.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// [`EphemeralStore`] held in process memory.
///
/// Uses `tokio::time::Instant`, so expiry follows a paused test clock.
#[derive(Debug, Default)]
pub struct InMemoryEphemeralStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                let count: u64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError::NotACounter(key.to_string()))?;
                let count = count.saturating_add(1);
                entry.value = count.to_string();
                Ok(count)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}

/// Spawn the background purge loop. Stops when `cancel_token` is cancelled.
pub fn spawn_purge_task<S>(
    store: std::sync::Arc<S>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()>
where
    S: EphemeralStore + ?Sized + 'static,
{
    tokio::spawn(run_purge_loop(store, interval, cancel_token))
}

#[instrument(skip_all, name = "auth.store.purge")]
async fn run_purge_loop<S>(
    store: std::sync::Arc<S>,
    interval: Duration,
    cancel_token: CancellationToken,
) where
    S: EphemeralStore + ?Sized,
{
    info!(
        target: "auth.store",
        interval_secs = interval.as_secs(),
        "Starting ephemeral store purge task"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "auth.store", "Ephemeral store purge task received shutdown signal, exiting");
                break;
            }
            _ = ticker.tick() => {
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => {
                        debug!(target: "auth.store", purged, "Purged expired entries");
                    }
                    Err(e) => {
                        warn!(target: "auth.store", error = %e, "Ephemeral store purge failed");
                    }
                }
            }
        }
    }

    info!(target: "auth.store", "Ephemeral store purge task stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_entries_vanish_at_ttl() {
        let store = InMemoryEphemeralStore::new();
        store.put("otp:u1", "digest".to_string(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("otp:u1").await.unwrap().as_deref(), Some("digest"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("otp:u1").await.unwrap(), None);
        assert_eq!(store.take("otp:u1").await.unwrap(), None);
        assert!(!store.remove("otp:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_is_one_shot() {
        let store = InMemoryEphemeralStore::new();
        store.put("k", "v".to_string(), TTL).await.unwrap();

        assert_eq!(store.take("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryEphemeralStore::new();
        store.put("k", "a".to_string(), TTL).await.unwrap();
        store.put("k", "b".to_string(), TTL).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_if_absent() {
        let store = InMemoryEphemeralStore::new();
        assert!(store.put_if_absent("k", "a".to_string(), TTL).await.unwrap());
        assert!(!store.put_if_absent("k", "b".to_string(), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));

        // An expired entry counts as absent.
        tokio::time::advance(TTL).await;
        assert!(store.put_if_absent("k", "c".to_string(), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_fixed_window() {
        let store = InMemoryEphemeralStore::new();
        let window = Duration::from_secs(900);

        assert_eq!(store.increment("login-attempts:u1", window).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(store.increment("login-attempts:u1", window).await.unwrap(), 2);

        // Window is anchored at the first increment, not extended by later ones.
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(store.get("login-attempts:u1").await.unwrap(), None);
        assert_eq!(store.increment("login-attempts:u1", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = InMemoryEphemeralStore::new();
        store.put("k", "digest".to_string(), TTL).await.unwrap();
        assert!(matches!(
            store.increment("k", TTL).await,
            Err(StoreError::NotACounter(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryEphemeralStore::new();
        store.put("short", "v".to_string(), Duration::from_secs(1)).await.unwrap();
        store.put("long", "v".to_string(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_runs_and_stops() {
        let store = Arc::new(InMemoryEphemeralStore::new());
        store.put("short", "v".to_string(), Duration::from_secs(1)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = spawn_purge_task(store.clone(), Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.is_empty().await);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_key_namespaces() {
        assert_eq!(keys::otp("u1"), "otp:u1");
        assert_eq!(keys::login_attempts("u1"), "login-attempts:u1");
        assert_eq!(keys::revoked_refresh("abc"), "revoked-refresh:abc");
    }
}
