//! Ephemeral key-value stores backing tokens and rate-limit counters.
//!
//! Two trait seams, each with a Redis implementation for production and a
//! DashMap implementation for tests and single-process deployments:
//!
//! - [`CredentialStore`] — set-with-expiry / get / delete, keyed by digest
//! - [`CounterStore`] — atomic increment-or-reject within a TTL window

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// Payload stored per issued token, keyed by the token digest.
/// The raw token itself is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub principal_id: i64,
    pub scopes: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Credential {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, digest: &str, cred: &Credential, ttl_secs: u64) -> anyhow::Result<()>;
    async fn get(&self, digest: &str) -> anyhow::Result<Option<Credential>>;
    /// Idempotent: deleting an unknown digest is a no-op.
    async fn delete(&self, digest: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter under `key` unless it already reached `max`.
    /// Returns true when admitted. The check-then-increment is atomic per
    /// key; a rejected attempt leaves the counter untouched.
    async fn try_increment(&self, key: &str, max: u64, ttl_secs: u64) -> anyhow::Result<bool>;
}

// ── Redis implementations ────────────────────────────────────

#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CredentialStore for RedisKv {
    async fn put(&self, digest: &str, cred: &Credential, ttl_secs: u64) -> anyhow::Result<()> {
        let json = serde_json::to_string(cred)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(digest, json, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, digest: &str) -> anyhow::Result<Option<Credential>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(digest).await?;
        Ok(raw.and_then(|v| serde_json::from_str(&v).ok()))
    }

    async fn delete(&self, digest: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(digest).await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisKv {
    async fn try_increment(&self, key: &str, max: u64, ttl_secs: u64) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        // GET, compare, INCR and EXPIRE as one atomic unit. Unlike a bare
        // INCR-then-check, a rejected attempt does not advance the counter.
        let script = redis::Script::new(
            r#"
            local current = tonumber(redis.call("GET", KEYS[1]) or "0")
            if current >= tonumber(ARGV[1]) then
                return 0
            end
            current = redis.call("INCR", KEYS[1])
            if current == 1 then
                redis.call("EXPIRE", KEYS[1], ARGV[2])
            end
            return 1
        "#,
        );
        let admitted: u64 = script
            .key(key)
            .arg(max)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }
}

// ── In-memory implementations ────────────────────────────────

/// Entry with an expiry timestamp, evicted lazily on read.
#[derive(Clone)]
struct MemEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local store used by tests and by deployments without Redis.
/// Per-key atomicity comes from the DashMap entry lock.
#[derive(Clone, Default)]
pub struct MemoryKv {
    creds: Arc<DashMap<String, MemEntry>>,
    counters: Arc<DashMap<String, MemEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryKv {
    async fn put(&self, digest: &str, cred: &Credential, ttl_secs: u64) -> anyhow::Result<()> {
        let json = serde_json::to_string(cred)?;
        self.creds.insert(
            digest.to_string(),
            MemEntry {
                value: json,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, digest: &str) -> anyhow::Result<Option<Credential>> {
        if let Some(entry) = self.creds.get(digest) {
            if Instant::now() < entry.expires_at {
                return Ok(serde_json::from_str(&entry.value).ok());
            }
            // expired — drop the ref before removing
            drop(entry);
            self.creds.remove(digest);
        }
        Ok(None)
    }

    async fn delete(&self, digest: &str) -> anyhow::Result<()> {
        self.creds.remove(digest);
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryKv {
    async fn try_increment(&self, key: &str, max: u64, ttl_secs: u64) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(MemEntry {
            value: "0".into(),
            expires_at: now + Duration::from_secs(ttl_secs),
        });
        if now >= entry.expires_at {
            entry.value = "0".into();
            entry.expires_at = now + Duration::from_secs(ttl_secs);
        }
        let current: u64 = entry.value.parse().unwrap_or(0);
        if current >= max {
            return Ok(false);
        }
        entry.value = (current + 1).to_string();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(principal_id: i64) -> Credential {
        Credential {
            principal_id,
            scopes: vec!["poll:read".into(), "poll:vote".into()],
            issued_at: 1_700_000_000,
            expires_at: 1_700_003_600,
        }
    }

    #[tokio::test]
    async fn memory_put_get_delete() {
        let kv = MemoryKv::new();
        kv.put("d1", &cred(7), 60).await.unwrap();
        assert_eq!(kv.get("d1").await.unwrap(), Some(cred(7)));
        kv.delete("d1").await.unwrap();
        assert_eq!(kv.get("d1").await.unwrap(), None);
        // second delete is a no-op
        kv.delete("d1").await.unwrap();
    }

    #[tokio::test]
    async fn memory_get_honours_ttl() {
        let kv = MemoryKv::new();
        kv.put("d2", &cred(1), 0).await.unwrap();
        assert_eq!(kv.get("d2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn counter_rejects_at_max_without_mutating() {
        let kv = MemoryKv::new();
        for _ in 0..3 {
            assert!(kv.try_increment("k", 3, 60).await.unwrap());
        }
        // at max: every further attempt is rejected
        for _ in 0..5 {
            assert!(!kv.try_increment("k", 3, 60).await.unwrap());
        }
        // a different key is unaffected
        assert!(kv.try_increment("k2", 3, 60).await.unwrap());
    }

    #[tokio::test]
    async fn counter_concurrent_burst_admits_exactly_max() {
        let kv = Arc::new(MemoryKv::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.try_increment("burst", 10, 60).await.unwrap()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn has_scope() {
        let c = cred(1);
        assert!(c.has_scope("poll:vote"));
        assert!(!c.has_scope("poll:admin"));
    }
}
