use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde_json::Value;

/// Cache TTL classes in seconds.
pub mod ttl {
    pub const CLUSTER_STATS: u64 = 30;
    pub const NODES: u64 = 60;
    pub const NAMESPACES: u64 = 300;
    pub const LIST_DEFAULT: u64 = 60;
    pub const USER_INFO: u64 = 1800;
    pub const CLUSTER_LIST: u64 = 600;
}

/// Best-effort Redis cache. Every failure degrades to a miss; the upstream
/// API stays the source of truth.
#[derive(Clone)]
pub struct Cache {
    pool: Option<Pool>,
}

impl Cache {
    pub fn new(pool: Option<Pool>) -> Self {
        Self { pool }
    }

    pub fn disabled() -> Self {
        Self { pool: None }
    }

    pub fn enabled(&self) -> bool {
        self.pool.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let pool = self.pool.as_ref()?;
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get: no connection");
                return None;
            }
        };
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &Value, ttl_secs: u64) -> bool {
        let Some(pool) = self.pool.as_ref() else {
            return false;
        };
        let Ok(mut conn) = pool.get().await else {
            return false;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set: serialization failed");
                return false;
            }
        };
        match conn.set_ex::<_, _, ()>(key, raw, ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(pool) = self.pool.as_ref() else {
            return false;
        };
        let Ok(mut conn) = pool.get().await else {
            return false;
        };
        conn.del::<_, ()>(key).await.is_ok()
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(pool) = self.pool.as_ref() else {
            return false;
        };
        let Ok(mut conn) = pool.get().await else {
            return false;
        };
        conn.exists::<_, bool>(key).await.unwrap_or(false)
    }

    /// Delete every key matching a glob pattern. SCAN-based so it never
    /// blocks the server the way KEYS would. Returns the number deleted.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let Ok(mut conn) = pool.get().await else {
            return 0;
        };
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;
            match scanned {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "cache scan failed");
                    return 0;
                }
            }
        }
        if keys.is_empty() {
            return 0;
        }
        let count = keys.len() as u64;
        if let Err(e) = conn.del::<_, ()>(keys).await {
            tracing::warn!(pattern, error = %e, "cache pattern delete failed");
            return 0;
        }
        count
    }
}

/// Cache key for a kind-scoped list: `k8s:<kind>:cluster:<id>:ns:<ns|_all>`.
pub fn resource_key(kind_label: &str, cluster_id: i64, namespace: Option<&str>) -> String {
    format!(
        "k8s:{}:cluster:{}:ns:{}",
        kind_label,
        cluster_id,
        namespace.unwrap_or("_all")
    )
}

/// Patterns a successful mutation must clear: every namespace variant of the
/// mutated kind on that cluster, plus the cluster stats snapshot.
pub fn invalidation_patterns(kind_label: &str, cluster_id: i64) -> Vec<String> {
    vec![
        format!("k8s:{}:cluster:{}:*", kind_label, cluster_id),
        format!("k8s:stats:cluster:{}:*", cluster_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_shapes() {
        assert_eq!(
            resource_key("pods", 3, Some("default")),
            "k8s:pods:cluster:3:ns:default"
        );
        assert_eq!(resource_key("nodes", 1, None), "k8s:nodes:cluster:1:ns:_all");
    }

    #[test]
    fn invalidation_covers_namespaced_and_cluster_wide_keys() {
        let patterns = invalidation_patterns("pods", 7);
        assert!(patterns.contains(&"k8s:pods:cluster:7:*".to_string()));
        // Both the ns-scoped and the _all key match the kind pattern.
        let glob = &patterns[0];
        let matches = |key: &str| {
            let prefix = glob.trim_end_matches('*');
            key.starts_with(prefix)
        };
        assert!(matches("k8s:pods:cluster:7:ns:default"));
        assert!(matches("k8s:pods:cluster:7:ns:_all"));
        assert!(!matches("k8s:pods:cluster:8:ns:default"));
    }

    #[tokio::test]
    async fn disabled_cache_degrades_to_misses() {
        let cache = Cache::disabled();
        assert!(!cache.enabled());
        assert!(cache.get("k8s:pods:cluster:1:ns:_all").await.is_none());
        assert!(!cache.set("k", &serde_json::json!({}), 60).await);
        assert_eq!(cache.delete_pattern("k8s:*").await, 0);
    }
}
