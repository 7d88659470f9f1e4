//! Two-tier cache for derived poll results: in-memory DashMap (tier 1)
//! backed by Redis (tier 2). Postgres is the source of truth; a committed
//! vote invalidates both tiers for that question.

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct ResultsCache {
    local: Arc<DashMap<String, CacheEntry>>,
    redis: Option<ConnectionManager>,
}

pub fn results_key(question_id: i64) -> String {
    format!("poll_results:{}", question_id)
}

impl ResultsCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: Some(redis),
        }
    }

    /// Cache without a Redis tier; used by tests and single-process setups.
    pub fn local_only() -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: None,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // tier 1: in-memory (with TTL check)
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: redis
        let Some(redis) = &self.redis else {
            return None;
        };
        let mut conn = redis.clone();
        if let Ok(Some(v)) = conn.get::<_, Option<String>>(key).await {
            let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(30);
            let ttl = if ttl_secs > 0 {
                Duration::from_secs(ttl_secs as u64)
            } else {
                Duration::from_secs(30)
            };
            self.local.insert(
                key.to_string(),
                CacheEntry {
                    value: v.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
            return serde_json::from_str(&v).ok();
        }

        None
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        }
        Ok(())
    }

    /// Drop the key from both tiers. Emitted after every committed vote so
    /// readers never see stale counts beyond the in-flight request.
    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!("cache invalidation failed for {}: {}", key, e);
            }
        }
    }

    /// Remove all locally-expired entries. Called periodically from a
    /// background task to bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
