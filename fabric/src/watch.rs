use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::TryStreamExt;
use kube::Client;
use kube::api::{Api, DynamicObject};
use kube::runtime::watcher::{self, Event};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::kinds::ResourceKind;
use crate::normalize;
use crate::pool::{ClientPool, release_temp_files};
use crate::ClusterConfig;

/// Where watcher events go. The WebSocket hub implements this; keeping the
/// seam a trait keeps the fabric free of any transport dependency.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn resource_update(
        &self,
        cluster_id: i64,
        kind: ResourceKind,
        namespace: Option<String>,
        payload: Value,
    );
}

struct ClusterWatch {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    temp_files: Vec<PathBuf>,
}

/// Supervisor for the per-cluster watch streams. One dedicated (unpooled)
/// client per cluster, one long-lived task per watched kind.
pub struct WatcherManager {
    pool: ClientPool,
    sink: Arc<dyn EventSink>,
    watchers: Mutex<HashMap<i64, ClusterWatch>>,
    startup: Arc<Semaphore>,
}

impl WatcherManager {
    pub fn new(pool: ClientPool, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            sink,
            watchers: Mutex::new(HashMap::new()),
            // Client construction happens off the request path; two at a
            // time keeps activation bursts from piling up.
            startup: Arc::new(Semaphore::new(2)),
        })
    }

    /// Idempotently start the four streams for a cluster. Returns
    /// immediately; the client build and stream spawn happen in a
    /// background task behind the startup gate.
    pub fn start(self: &Arc<Self>, cluster: ClusterConfig) {
        {
            let mut watchers = self.watchers.lock().expect("watcher lock poisoned");
            if watchers.contains_key(&cluster.id) {
                tracing::debug!(cluster_id = cluster.id, "watcher already running");
                return;
            }
            watchers.insert(
                cluster.id,
                ClusterWatch {
                    cancel: CancellationToken::new(),
                    tasks: Vec::new(),
                    temp_files: Vec::new(),
                },
            );
        }

        let manager = self.clone();
        tokio::spawn(async move {
            // Startup gate: at most two cluster activations build clients
            // concurrently. The semaphore is never closed.
            let _permit = manager.startup.acquire().await.ok();
            let (client, temp_files) = match manager.pool.build_unpooled(&cluster).await {
                Ok(built) => built,
                Err(e) => {
                    tracing::error!(cluster_id = cluster.id, error = %e, "watcher client build failed");
                    manager
                        .watchers
                        .lock()
                        .expect("watcher lock poisoned")
                        .remove(&cluster.id);
                    return;
                }
            };

            let cancel = {
                let mut watchers = manager.watchers.lock().expect("watcher lock poisoned");
                match watchers.get_mut(&cluster.id) {
                    Some(watch) => {
                        watch.temp_files = temp_files;
                        watch.cancel.clone()
                    }
                    None => {
                        // stop() raced the startup; nothing to run.
                        release_temp_files(&temp_files);
                        return;
                    }
                }
            };

            let mut tasks = Vec::with_capacity(ResourceKind::WATCHED.len());
            for kind in ResourceKind::WATCHED {
                tasks.push(tokio::spawn(run_stream(
                    client.clone(),
                    cluster.id,
                    kind,
                    manager.sink.clone(),
                    cancel.clone(),
                )));
            }

            let mut watchers = manager.watchers.lock().expect("watcher lock poisoned");
            match watchers.get_mut(&cluster.id) {
                Some(watch) => watch.tasks = tasks,
                None => {
                    cancel.cancel();
                    for task in tasks {
                        task.abort();
                    }
                }
            }
            tracing::info!(cluster_id = cluster.id, "watcher started");
        });
    }

    /// Stop all streams for a cluster, drop its client and release its CA
    /// material. Safe to call for clusters that were never started.
    pub async fn stop(&self, cluster_id: i64) {
        let removed = self
            .watchers
            .lock()
            .expect("watcher lock poisoned")
            .remove(&cluster_id);
        let Some(watch) = removed else {
            return;
        };
        watch.cancel.cancel();
        for task in watch.tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!(cluster_id, "watcher task did not stop in time");
            }
        }
        release_temp_files(&watch.temp_files);
        tracing::info!(cluster_id, "watcher stopped");
    }

    pub async fn stop_all(&self) {
        let ids: Vec<i64> = self
            .watchers
            .lock()
            .expect("watcher lock poisoned")
            .keys()
            .copied()
            .collect();
        for cluster_id in ids {
            self.stop(cluster_id).await;
        }
    }

    pub fn stats(&self) -> Value {
        let watchers = self.watchers.lock().expect("watcher lock poisoned");
        let mut ids: Vec<i64> = watchers.keys().copied().collect();
        ids.sort_unstable();
        json!({
            "active_watchers": watchers.len(),
            "cluster_ids": ids,
        })
    }
}

/// One long-lived watch stream. A failure terminates this stream only; the
/// siblings keep running and nothing restarts it until the cluster is
/// re-activated.
async fn run_stream(
    client: Client,
    cluster_id: i64,
    kind: ResourceKind,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    let ar = kind.api_resource();
    let api: Api<DynamicObject> = Api::all_with(client, &ar);
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);

    // kube's watcher folds raw ADDED/MODIFIED into Apply; the first apply
    // per uid is an ADDED from the client's point of view.
    let mut seen: HashSet<String> = HashSet::new();
    tracing::info!(cluster_id, kind = %kind, "watch stream started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(cluster_id, kind = %kind, "watch stream cancelled");
                break;
            }
            next = stream.try_next() => match next {
                Ok(Some(event)) => {
                    handle_event(cluster_id, kind, &sink, &mut seen, event).await;
                }
                Ok(None) => {
                    tracing::warn!(cluster_id, kind = %kind, "watch stream ended");
                    break;
                }
                Err(e) => {
                    tracing::error!(cluster_id, kind = %kind, error = %e, "watch stream failed");
                    break;
                }
            }
        }
    }
}

fn uid_of(obj: &DynamicObject) -> String {
    obj.metadata
        .uid
        .clone()
        .or_else(|| obj.metadata.name.clone())
        .unwrap_or_default()
}

async fn handle_event(
    cluster_id: i64,
    kind: ResourceKind,
    sink: &Arc<dyn EventSink>,
    seen: &mut HashSet<String>,
    event: Event<DynamicObject>,
) {
    let (obj, event_type) = match event {
        Event::Init | Event::InitDone => return,
        Event::InitApply(obj) => {
            seen.insert(uid_of(&obj));
            (obj, "ADDED")
        }
        Event::Apply(obj) => {
            let event_type = if seen.insert(uid_of(&obj)) {
                "ADDED"
            } else {
                "MODIFIED"
            };
            (obj, event_type)
        }
        Event::Delete(obj) => {
            seen.remove(&uid_of(&obj));
            (obj, "DELETED")
        }
    };

    let value = match serde_json::to_value(&obj) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(cluster_id, kind = %kind, error = %e, "event serialization failed");
            return;
        }
    };
    let namespace = obj.metadata.namespace.clone();
    let mut payload = normalize::summarize(kind, &value, Utc::now());
    if let Some(map) = payload.as_object_mut() {
        map.insert("event_type".into(), json!(event_type));
    }
    sink.resource_update(cluster_id, kind, namespace, payload)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::AuthMode;

    struct NullSink;

    #[async_trait::async_trait]
    impl EventSink for NullSink {
        async fn resource_update(
            &self,
            _cluster_id: i64,
            _kind: ResourceKind,
            _namespace: Option<String>,
            _payload: Value,
        ) {
        }
    }

    fn cluster(id: i64) -> ClusterConfig {
        ClusterConfig {
            id,
            name: format!("c{}", id),
            endpoint: "https://192.0.2.1:6443".into(),
            auth_mode: AuthMode::Token,
            kubeconfig: None,
            token: Some("tok".into()),
            ca_cert: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_per_cluster() {
        let pool = ClientPool::new(PoolConfig::default());
        let manager = WatcherManager::new(pool, Arc::new(NullSink));
        manager.start(cluster(1));
        manager.start(cluster(1));
        manager.start(cluster(2));
        let stats = manager.stats();
        assert_eq!(stats["active_watchers"], 2);
        assert_eq!(stats["cluster_ids"], json!([1, 2]));
        manager.stop_all().await;
        assert_eq!(manager.stats()["active_watchers"], 0);
    }

    #[tokio::test]
    async fn stop_of_unknown_cluster_is_a_no_op() {
        let pool = ClientPool::new(PoolConfig::default());
        let manager = WatcherManager::new(pool, Arc::new(NullSink));
        manager.stop(99).await;
        assert_eq!(manager.stats()["active_watchers"], 0);
    }
}
