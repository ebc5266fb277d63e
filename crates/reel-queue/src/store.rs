//! Persistence for queue entries.
//!
//! The queue keeps its working set in memory and writes every transition
//! through a `QueueStore` so a restarted process can pick up where it left
//! off. Exclusivity of `dequeue` is provided by the in-process lock, not by
//! the store.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::QueueEntry;
use crate::error::QueueResult;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert or replace an entry.
    async fn save(&self, entry: &QueueEntry) -> QueueResult<()>;

    async fn remove(&self, entry_id: &str) -> QueueResult<()>;

    /// Every stored entry, in no particular order.
    async fn load_all(&self) -> QueueResult<Vec<QueueEntry>>;
}

/// Process-local store. Entries are kept serialized so a reload goes
/// through the same path as the Redis store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn save(&self, entry: &QueueEntry) -> QueueResult<()> {
        let payload = serde_json::to_string(entry)?;
        self.entries.lock().await.insert(entry.id.clone(), payload);
        Ok(())
    }

    async fn remove(&self, entry_id: &str) -> QueueResult<()> {
        self.entries.lock().await.remove(entry_id);
        Ok(())
    }

    async fn load_all(&self) -> QueueResult<Vec<QueueEntry>> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .map(|payload| serde_json::from_str(payload).map_err(Into::into))
            .collect()
    }
}

/// Redis-backed store: one hash, entry id → JSON.
pub struct RedisQueueStore {
    client: redis::Client,
    key: String,
}

impl RedisQueueStore {
    /// Create a store under `{prefix}:entries`.
    pub fn new(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key: format!("{prefix}:entries"),
        })
    }

    /// Check the server is reachable.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn save(&self, entry: &QueueEntry) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(entry)?;
        conn.hset::<_, _, _, ()>(&self.key, &entry.id, payload).await?;
        Ok(())
    }

    async fn remove(&self, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.hdel::<_, _, ()>(&self.key, entry_id).await?;
        Ok(())
    }

    async fn load_all(&self) -> QueueResult<Vec<QueueEntry>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: HashMap<String, String> = conn.hgetall(&self.key).await?;

        let mut entries = Vec::with_capacity(raw.len());
        for (id, payload) in raw {
            match serde_json::from_str::<QueueEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // Drop unreadable rows so they are not retried forever.
                    tracing::warn!(entry_id = %id, error = %e, "Dropping malformed queue entry");
                    conn.hdel::<_, _, ()>(&self.key, &id).await?;
                }
            }
        }

        debug!(count = entries.len(), key = %self.key, "Loaded queue entries");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EnqueueOptions;
    use crate::job::ComposeMovieJob;
    use reel_models::{CompositionOptions, JobId};
    use std::time::Duration;

    fn entry(seq: u64) -> QueueEntry {
        let job = ComposeMovieJob::new(JobId::new(), "u", "p", CompositionOptions::default());
        QueueEntry::new(seq, job, EnqueueOptions::default(), 3, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryQueueStore::new();
        let a = entry(1);
        let b = entry(2);

        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        store.remove(&a.id).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].job, b.job);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_store_round_trip() {
        let url = std::env::var("QUEUE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("reel:test:{}", uuid::Uuid::new_v4());
        let store = RedisQueueStore::new(&url, &prefix).unwrap();
        store.ping().await.unwrap();

        let e = entry(7);
        store.save(&e).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "7");

        store.remove(&e.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
