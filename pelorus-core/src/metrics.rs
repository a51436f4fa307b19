//! Fleet metrics store abstraction
//!
//! The supervisor publishes per-agent metrics and the fleet health summary
//! to a shared key-value store with per-key expiry; dashboards and other
//! components read from it independently. The supervisor never reads back
//! its own writes for correctness, and a write failure is logged and
//! swallowed by the caller - losing a snapshot must not destabilize the
//! fleet. Readers must tolerate a key being absent (expired) at any time.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Expiry for per-agent metric keys
pub const AGENT_METRICS_TTL: Duration = Duration::from_secs(300);

/// Expiry for the fleet-wide health summary key
pub const FLEET_HEALTH_TTL: Duration = Duration::from_secs(60);

/// Key under which the fleet health summary is published
pub const FLEET_HEALTH_KEY: &str = "pelorus:fleet:health";

/// Key under which one agent's metrics are published
pub fn agent_metrics_key(agent_id: &str) -> String {
    format!("pelorus:agent:{}", agent_id)
}

/// Trait for metrics store backends
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Store a JSON snapshot under `key`, expiring after `ttl`
    async fn put_json(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Fetch a snapshot; `None` if the key is absent or expired
    async fn get_json(&self, key: &str) -> Result<Option<Value>>;
}

/// In-memory metrics store with lazy expiry
///
/// Used for local development and tests; production deployments point the
/// supervisor at the shared store the dashboards read.
pub struct InMemoryMetricsStore {
    entries: Arc<RwLock<HashMap<String, (Value, Instant)>>>,
}

impl InMemoryMetricsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live (non-expired) keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|(_, dl)| *dl > now).count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn put_json(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let deadline = Instant::now() + ttl;
        let mut entries = self.entries.write().await;
        // Drop already-expired keys while we hold the write lock
        let now = Instant::now();
        entries.retain(|_, (_, dl)| *dl > now);
        entries.insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, dl)| *dl > Instant::now())
            .map(|(v, _)| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemoryMetricsStore::new();
        store
            .put_json("pelorus:agent:weather", json!({"cpu": 0.5}), AGENT_METRICS_TTL)
            .await
            .unwrap();

        let value = store.get_json("pelorus:agent:weather").await.unwrap();
        assert_eq!(value, Some(json!({"cpu": 0.5})));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = InMemoryMetricsStore::new();
        assert_eq!(store.get_json("pelorus:agent:ghost").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire() {
        let store = InMemoryMetricsStore::new();
        store
            .put_json(FLEET_HEALTH_KEY, json!({"total": 3}), FLEET_HEALTH_TTL)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.get_json(FLEET_HEALTH_KEY).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get_json(FLEET_HEALTH_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_ttl() {
        let store = InMemoryMetricsStore::new();
        let key = agent_metrics_key("tidal");
        store
            .put_json(&key, json!(1), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store
            .put_json(&key, json!(2), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(store.get_json(&key).await.unwrap(), Some(json!(2)));
    }
}
