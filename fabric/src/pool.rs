use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::{FabricError, FabricResult};
use crate::{AuthMode, ClusterConfig};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections_per_cluster: usize,
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_cluster: 10,
            connection_timeout: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

struct Entry {
    entry_id: u64,
    client: Client,
    created_at: Instant,
    last_used: Instant,
    last_health_check: Instant,
    last_health_ok: bool,
    temp_files: Vec<PathBuf>,
}

struct Inner {
    config: PoolConfig,
    pools: Mutex<HashMap<i64, Vec<Entry>>>,
    next_entry_id: AtomicU64,
}

/// Per-cluster pool of authenticated API clients. The mutex only ever guards
/// map bookkeeping; client construction and health checks run outside it.
#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<Inner>,
}

/// A client borrowed from the pool. Dropping it stamps the entry's
/// `last_used`, which is what keeps the entry alive across the sweep.
pub struct PooledClient {
    client: Client,
    cluster_id: i64,
    entry_id: u64,
    inner: Arc<Inner>,
}

impl PooledClient {
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
        if let Some(pool) = pools.get_mut(&self.cluster_id)
            && let Some(entry) = pool.iter_mut().find(|e| e.entry_id == self.entry_id)
        {
            entry.last_used = Instant::now();
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PoolStats {
    pub total_clusters: usize,
    pub total_connections: usize,
    pub connections_per_cluster: HashMap<String, usize>,
}

impl ClientPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pools: Mutex::new(HashMap::new()),
                next_entry_id: AtomicU64::new(1),
            }),
        }
    }

    /// Borrow a client for the cluster. Expired entries are evicted first;
    /// a reusable entry is handed out after an at-most-once-per-interval
    /// health check; otherwise a fresh client is synthesized while capacity
    /// remains. Saturation surfaces as `PoolExhausted`.
    pub async fn borrow(&self, cluster: &ClusterConfig) -> FabricResult<PooledClient> {
        loop {
            let candidate = {
                let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
                let pool = pools.entry(cluster.id).or_default();
                Self::evict_expired(pool, self.inner.config.connection_timeout);

                if let Some(entry) = pool.first_mut() {
                    entry.last_used = Instant::now();
                    let due = entry.last_health_check.elapsed()
                        > self.inner.config.health_check_interval;
                    Some((entry.entry_id, entry.client.clone(), due))
                } else {
                    None
                }
            };

            let (entry_id, client, health_check_due) = match candidate {
                Some(c) => c,
                None => {
                    // No reusable entry: synthesize one if capacity allows.
                    {
                        let pools = self.inner.pools.lock().expect("pool lock poisoned");
                        let len = pools.get(&cluster.id).map(|p| p.len()).unwrap_or(0);
                        if len >= self.inner.config.max_connections_per_cluster {
                            return Err(FabricError::PoolExhausted(cluster.id));
                        }
                    }
                    let (client, temp_files) = build_client(cluster).await?;
                    let entry_id = self.inner.next_entry_id.fetch_add(1, Ordering::Relaxed);
                    let now = Instant::now();
                    let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
                    let pool = pools.entry(cluster.id).or_default();
                    if pool.len() < self.inner.config.max_connections_per_cluster {
                        pool.push(Entry {
                            entry_id,
                            client: client.clone(),
                            created_at: now,
                            last_used: now,
                            last_health_check: now,
                            last_health_ok: true,
                            temp_files,
                        });
                    } else {
                        // Raced past capacity: hand the client out unpooled so
                        // the per-cluster bound still holds.
                        release_temp_files(&temp_files);
                    }
                    drop(pools);
                    return Ok(PooledClient {
                        client,
                        cluster_id: cluster.id,
                        entry_id,
                        inner: self.inner.clone(),
                    });
                }
            };

            if !health_check_due {
                return Ok(PooledClient {
                    client,
                    cluster_id: cluster.id,
                    entry_id,
                    inner: self.inner.clone(),
                });
            }

            // Health check runs outside the lock so borrows on other clusters
            // (and on this one) are never serialized behind an API call.
            let healthy = client.apiserver_version().await.is_ok();
            let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
            if let Some(pool) = pools.get_mut(&cluster.id) {
                if healthy {
                    if let Some(entry) = pool.iter_mut().find(|e| e.entry_id == entry_id) {
                        entry.last_health_check = Instant::now();
                        entry.last_health_ok = true;
                    }
                    drop(pools);
                    return Ok(PooledClient {
                        client,
                        cluster_id: cluster.id,
                        entry_id,
                        inner: self.inner.clone(),
                    });
                }
                if let Some(pos) = pool.iter().position(|e| e.entry_id == entry_id) {
                    let entry = pool.remove(pos);
                    tracing::warn!(
                        cluster_id = cluster.id,
                        entry_id,
                        "evicting unhealthy pool entry"
                    );
                    release_temp_files(&entry.temp_files);
                }
            }
            // Retry with the next candidate (or a fresh client).
        }
    }

    /// Build a dedicated client that never enters the pool. The caller owns
    /// the returned temp files and must release them when done (watchers do
    /// this on stop).
    pub async fn build_unpooled(
        &self,
        cluster: &ClusterConfig,
    ) -> FabricResult<(Client, Vec<PathBuf>)> {
        build_client(cluster).await
    }

    /// Close every entry for the cluster and delete its temp files.
    pub fn evict_cluster(&self, cluster_id: i64) {
        let removed = {
            let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
            pools.remove(&cluster_id)
        };
        if let Some(entries) = removed {
            for entry in &entries {
                release_temp_files(&entry.temp_files);
            }
            tracing::info!(cluster_id, count = entries.len(), "evicted cluster pool");
        }
    }

    /// Time-based sweep of expired entries. Never issues API calls; a dead
    /// upstream must not amplify into a storm of probes from the sweeper.
    pub fn sweep(&self) {
        let mut pools = self.inner.pools.lock().expect("pool lock poisoned");
        pools.retain(|_, pool| {
            Self::evict_expired(pool, self.inner.config.connection_timeout);
            !pool.is_empty()
        });
    }

    pub fn stats(&self) -> PoolStats {
        let pools = self.inner.pools.lock().expect("pool lock poisoned");
        let mut per_cluster = HashMap::new();
        let mut total = 0;
        for (cluster_id, pool) in pools.iter() {
            per_cluster.insert(cluster_id.to_string(), pool.len());
            total += pool.len();
        }
        PoolStats {
            total_clusters: pools.len(),
            total_connections: total,
            connections_per_cluster: per_cluster,
        }
    }

    /// Borrow a client and ask the apiserver for its version.
    pub async fn test_connection(&self, cluster: &ClusterConfig) -> FabricResult<String> {
        let handle = self.borrow(cluster).await?;
        let info = handle
            .client()
            .apiserver_version()
            .await
            .map_err(FabricError::from)?;
        Ok(format!("{}.{}", info.major, info.minor))
    }

    fn evict_expired(pool: &mut Vec<Entry>, timeout: Duration) {
        pool.retain(|entry| {
            if entry.last_used.elapsed() > timeout {
                tracing::debug!(
                    entry_id = entry.entry_id,
                    idle_secs = entry.last_used.elapsed().as_secs(),
                    "evicting idle pool entry"
                );
                release_temp_files(&entry.temp_files);
                false
            } else {
                true
            }
        });
    }
}

pub(crate) fn release_temp_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "temp file already gone");
        }
    }
}

/// Synthesize a kube client from the cluster descriptor. Kubeconfig blobs
/// are parsed in memory; bearer-token clusters get a generated kubeconfig,
/// with the CA bundle (when provided) materialized to a temp file whose
/// lifetime is tied to the pool entry.
async fn build_client(cluster: &ClusterConfig) -> FabricResult<(Client, Vec<PathBuf>)> {
    match cluster.auth_mode {
        AuthMode::Kubeconfig => {
            let content = cluster.kubeconfig.as_deref().ok_or_else(|| {
                FabricError::Validation("cluster has kubeconfig auth but no kubeconfig".into())
            })?;
            let kubeconfig = Kubeconfig::from_yaml(content)
                .map_err(|e| FabricError::Validation(format!("invalid kubeconfig: {}", e)))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| FabricError::Validation(format!("unusable kubeconfig: {}", e)))?;
            let client = Client::try_from(config)
                .map_err(|e| FabricError::Internal(format!("client build failed: {}", e)))?;
            Ok((client, Vec::new()))
        }
        AuthMode::Token => {
            let token = cluster.token.as_deref().ok_or_else(|| {
                FabricError::Validation("cluster has token auth but no token".into())
            })?;
            let mut temp_files = Vec::new();
            let ca_path = match cluster.ca_cert.as_deref() {
                Some(ca) => {
                    let mut file = tempfile::Builder::new()
                        .prefix("armada-ca-")
                        .suffix(".pem")
                        .tempfile()
                        .map_err(|e| FabricError::Internal(format!("temp file: {}", e)))?;
                    file.write_all(ca.as_bytes())
                        .map_err(|e| FabricError::Internal(format!("temp file write: {}", e)))?;
                    let (_file, path) = file
                        .keep()
                        .map_err(|e| FabricError::Internal(format!("temp file keep: {}", e)))?;
                    temp_files.push(path.clone());
                    Some(path)
                }
                None => None,
            };

            let mut cluster_section = serde_json::json!({ "server": cluster.endpoint });
            if let Some(path) = &ca_path {
                cluster_section["certificate-authority"] =
                    serde_json::Value::String(path.display().to_string());
            }
            let doc = serde_json::json!({
                "apiVersion": "v1",
                "kind": "Config",
                "clusters": [{ "name": cluster.name, "cluster": cluster_section }],
                "users": [{ "name": "armada", "user": { "token": token } }],
                "contexts": [{
                    "name": "armada",
                    "context": { "cluster": cluster.name, "user": "armada" }
                }],
                "current-context": "armada",
            });
            let yaml = serde_yaml::to_string(&doc)?;
            let kubeconfig = Kubeconfig::from_yaml(&yaml)
                .map_err(|e| FabricError::Internal(format!("generated kubeconfig: {}", e)))?;
            let result = async {
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| {
                            FabricError::Validation(format!("unusable cluster config: {}", e))
                        })?;
                Client::try_from(config)
                    .map_err(|e| FabricError::Internal(format!("client build failed: {}", e)))
            }
            .await;
            match result {
                Ok(client) => Ok((client, temp_files)),
                Err(e) => {
                    // Entry never materialized; its CA file must not leak.
                    release_temp_files(&temp_files);
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn token_cluster(ca: Option<&str>) -> ClusterConfig {
        ClusterConfig {
            id: 1,
            name: "test".into(),
            endpoint: "https://10.0.0.1:6443".into(),
            auth_mode: AuthMode::Token,
            kubeconfig: None,
            token: Some("abc123".into()),
            ca_cert: ca.map(|s| s.to_string()),
            active: true,
        }
    }

    #[tokio::test]
    async fn token_client_builds_without_ca() {
        install_crypto_provider();
        let pool = ClientPool::new(PoolConfig::default());
        let (client, temp_files) = pool
            .build_unpooled(&token_cluster(None))
            .await
            .expect("client from token config");
        assert!(temp_files.is_empty());
        assert_eq!(client.default_namespace(), "default");
    }

    #[tokio::test]
    async fn missing_token_is_a_validation_error() {
        let pool = ClientPool::new(PoolConfig::default());
        let mut cluster = token_cluster(None);
        cluster.token = None;
        let result = pool.build_unpooled(&cluster).await;
        assert!(matches!(result, Err(FabricError::Validation(_))));
    }

    #[tokio::test]
    async fn kubeconfig_mode_rejects_garbage() {
        let pool = ClientPool::new(PoolConfig::default());
        let cluster = ClusterConfig {
            auth_mode: AuthMode::Kubeconfig,
            kubeconfig: Some(":not yaml: [".into()),
            token: None,
            ..token_cluster(None)
        };
        let result = pool.borrow(&cluster).await;
        assert!(matches!(result, Err(FabricError::Validation(_))));
    }

    #[tokio::test]
    async fn stats_reflect_pooled_entries() {
        install_crypto_provider();
        let pool = ClientPool::new(PoolConfig::default());
        let cluster = token_cluster(None);
        let handle = pool.borrow(&cluster).await.expect("borrow");
        let stats = pool.stats();
        assert_eq!(stats.total_clusters, 1);
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.connections_per_cluster.get("1"), Some(&1));
        drop(handle);

        pool.evict_cluster(1);
        let stats = pool.stats();
        assert_eq!(stats.total_clusters, 0);
        assert_eq!(stats.total_connections, 0);
    }

    #[tokio::test]
    async fn borrow_reuses_the_pooled_entry() {
        install_crypto_provider();
        let pool = ClientPool::new(PoolConfig::default());
        let cluster = token_cluster(None);
        drop(pool.borrow(&cluster).await.expect("first borrow"));
        drop(pool.borrow(&cluster).await.expect("second borrow"));
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn ca_temp_file_is_released_on_evict() {
        install_crypto_provider();
        let pool = ClientPool::new(PoolConfig::default());
        let ca = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let cluster = token_cluster(Some(ca));
        let (client, temp_files) = pool
            .build_unpooled(&cluster)
            .await
            .expect("client with CA file");
        drop(client);
        assert_eq!(temp_files.len(), 1);
        assert!(temp_files[0].exists());
        release_temp_files(&temp_files);
        assert!(!temp_files[0].exists());
    }
}
