use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, DynamicObject, ListParams, LogParams};
use serde::Serialize;
use serde_json::{Value, json};

use crate::cache::{self, Cache, ttl};
use crate::error::{FabricError, FabricResult};
use crate::kinds::ResourceKind;
use crate::normalize;
use crate::pool::ClientPool;
use crate::ClusterConfig;

/// One upstream page of normalized snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: u32,
    pub continue_token: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

pub(crate) fn dyn_api(client: Client, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = kind.api_resource();
    if kind.namespaced() {
        match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        }
    } else {
        Api::all_with(client, &ar)
    }
}

fn to_value(obj: &DynamicObject) -> FabricResult<Value> {
    serde_json::to_value(obj).map_err(FabricError::from)
}

/// Cursor-paged list of one kind. Exactly one upstream page per call; the
/// continuation token is handed back to the caller untouched.
pub async fn list_page(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    opts: &ListOptions,
) -> FabricResult<Page> {
    if opts.limit < 1 || opts.limit > 1000 {
        return Err(FabricError::Validation(format!(
            "limit must be within [1, 1000], got {}",
            opts.limit
        )));
    }
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);

    let mut lp = ListParams::default().limit(opts.limit);
    if let Some(token) = &opts.continue_token {
        lp = lp.continue_token(token);
    }
    if let Some(selector) = &opts.label_selector {
        lp = lp.labels(selector);
    }
    if let Some(selector) = &opts.field_selector {
        lp = lp.fields(selector);
    }

    let list = api.list(&lp).await.map_err(FabricError::from)?;
    let now = Utc::now();
    let items = list
        .items
        .iter()
        .map(|obj| Ok(normalize::summarize(kind, &to_value(obj)?, now)))
        .collect::<FabricResult<Vec<_>>>()?;
    let continue_token = list.metadata.continue_.filter(|token| !token.is_empty());
    Ok(Page {
        items,
        continue_token,
    })
}

/// Detail view with conditions, annotations and a sanitized round-trippable
/// object. Never cached; the cluster is authoritative for detail reads.
pub async fn detail(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> FabricResult<Value> {
    if kind.namespaced() && namespace.is_none() {
        return Err(FabricError::Validation(format!(
            "namespace required for {}",
            kind.label()
        )));
    }
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let obj = api.get(name).await.map_err(FabricError::from)?;
    Ok(normalize::detail(kind, &to_value(&obj)?, Utc::now()))
}

/// YAML rendering of the sanitized object.
pub async fn yaml(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> FabricResult<String> {
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let obj = api.get(name).await.map_err(FabricError::from)?;
    let sanitized = normalize::sanitize(&to_value(&obj)?);
    serde_yaml::to_string(&sanitized).map_err(FabricError::from)
}

/// Cluster-level counters: nodes, namespaces, pods (total/running), services.
pub async fn cluster_stats(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
) -> FabricResult<Value> {
    let key = cache::resource_key("stats", cluster.id, None);
    if let Some(cached) = cache.get(&key).await {
        return Ok(cached);
    }

    let handle = pool.borrow(cluster).await?;
    let client = handle.client();
    let lp = ListParams::default();

    let nodes = dyn_api(client.clone(), ResourceKind::Node, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;
    let namespaces = dyn_api(client.clone(), ResourceKind::Namespace, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;
    let pods = dyn_api(client.clone(), ResourceKind::Pod, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;
    let services = dyn_api(client, ResourceKind::Service, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;

    let running = pods
        .items
        .iter()
        .filter(|pod| {
            pod.data
                .get("status")
                .and_then(|s| s.get("phase"))
                .and_then(Value::as_str)
                == Some("Running")
        })
        .count();

    let stats = json!({
        "nodes": nodes.items.len(),
        "namespaces": namespaces.items.len(),
        "total_pods": pods.items.len(),
        "running_pods": running,
        "services": services.items.len(),
    });
    cache.set(&key, &stats, ttl::CLUSTER_STATS).await;
    Ok(stats)
}

/// Node summaries plus the live pod count per node.
pub async fn nodes_info(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
) -> FabricResult<Value> {
    let key = cache::resource_key(ResourceKind::Node.label(), cluster.id, None);
    if let Some(cached) = cache.get(&key).await {
        return Ok(cached);
    }

    let handle = pool.borrow(cluster).await?;
    let client = handle.client();
    let lp = ListParams::default();
    let nodes = dyn_api(client.clone(), ResourceKind::Node, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;
    let pods = dyn_api(client, ResourceKind::Pod, None)
        .list(&lp)
        .await
        .map_err(FabricError::from)?;

    let mut pods_per_node: std::collections::HashMap<String, usize> = Default::default();
    for pod in &pods.items {
        if let Some(node) = pod
            .data
            .get("spec")
            .and_then(|s| s.get("nodeName"))
            .and_then(Value::as_str)
        {
            *pods_per_node.entry(node.to_string()).or_default() += 1;
        }
    }

    let now = Utc::now();
    let mut out = Vec::with_capacity(nodes.items.len());
    for node in &nodes.items {
        let value = to_value(node)?;
        let mut snap = normalize::summarize(ResourceKind::Node, &value, now);
        if let Some(map) = snap.as_object_mut() {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            map.insert(
                "pods_usage".into(),
                json!(pods_per_node.get(&name).copied().unwrap_or(0)),
            );
        }
        out.push(snap);
    }

    let value = Value::Array(out);
    cache.set(&key, &value, ttl::NODES).await;
    Ok(value)
}

/// Node detail with conditions and taints.
pub async fn node_detail(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    name: &str,
) -> FabricResult<Value> {
    let mut snap = detail(pool, cluster, ResourceKind::Node, None, name).await?;
    if let Some(map) = snap.as_object_mut() {
        let taints = map
            .get("object")
            .and_then(|o| o.get("spec"))
            .and_then(|s| s.get("taints"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        map.insert("taints".into(), taints);
    }
    Ok(snap)
}

/// Namespace summaries, cached under the long-lived namespace TTL class.
pub async fn namespaces_info(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
) -> FabricResult<Value> {
    let key = cache::resource_key(ResourceKind::Namespace.label(), cluster.id, None);
    if let Some(cached) = cache.get(&key).await {
        return Ok(cached);
    }
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), ResourceKind::Namespace, None);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(FabricError::from)?;
    let now = Utc::now();
    let items = list
        .items
        .iter()
        .map(|obj| Ok(normalize::summarize(ResourceKind::Namespace, &to_value(obj)?, now)))
        .collect::<FabricResult<Vec<_>>>()?;
    let value = Value::Array(items);
    cache.set(&key, &value, ttl::NAMESPACES).await;
    Ok(value)
}

/// Resource counts inside one namespace.
pub async fn namespace_resources(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    namespace: &str,
) -> FabricResult<Value> {
    let handle = pool.borrow(cluster).await?;
    let client = handle.client();
    let lp = ListParams::default();

    let mut counts = serde_json::Map::new();
    for kind in [
        ResourceKind::Pod,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
    ] {
        let list = dyn_api(client.clone(), kind, Some(namespace))
            .list(&lp)
            .await
            .map_err(FabricError::from)?;
        counts.insert(kind.label().replace('-', "_"), json!(list.items.len()));
    }
    Ok(Value::Object(counts))
}

fn metrics_api(client: Client, plural: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = kube::api::ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    };
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    }
}

/// Node usage from the metrics-server aggregation API. Missing
/// metrics-server surfaces as the upstream 404.
pub async fn node_metrics(pool: &ClientPool, cluster: &ClusterConfig) -> FabricResult<Value> {
    let handle = pool.borrow(cluster).await?;
    let api = metrics_api(handle.client(), "nodes", "NodeMetrics", None);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(FabricError::from)?;
    let items = list
        .items
        .iter()
        .map(|item| {
            let value = serde_json::to_value(item)?;
            Ok(json!({
                "name": value.pointer("/metadata/name"),
                "cpu": value.pointer("/usage/cpu"),
                "memory": value.pointer("/usage/memory"),
                "window": value.get("window"),
                "timestamp": value.get("timestamp"),
            }))
        })
        .collect::<FabricResult<Vec<_>>>()?;
    Ok(Value::Array(items))
}

/// Per-pod usage from the same aggregation API.
pub async fn pod_metrics(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    namespace: Option<&str>,
) -> FabricResult<Value> {
    let handle = pool.borrow(cluster).await?;
    let api = metrics_api(handle.client(), "pods", "PodMetrics", namespace);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(FabricError::from)?;
    let items = list
        .items
        .iter()
        .map(|item| {
            let value = serde_json::to_value(item)?;
            Ok(json!({
                "name": value.pointer("/metadata/name"),
                "namespace": value.pointer("/metadata/namespace"),
                "containers": value.get("containers"),
                "timestamp": value.get("timestamp"),
            }))
        })
        .collect::<FabricResult<Vec<_>>>()?;
    Ok(Value::Array(items))
}

/// Tail of one container's logs.
pub async fn pod_logs(
    pool: &ClientPool,
    cluster: &ClusterConfig,
    namespace: &str,
    name: &str,
    container: Option<&str>,
    tail_lines: Option<i64>,
) -> FabricResult<String> {
    let handle = pool.borrow(cluster).await?;
    let api: Api<Pod> = Api::namespaced(handle.client(), namespace);
    let mut lp = LogParams::default();
    lp.container = container.map(|c| c.to_string());
    lp.tail_lines = tail_lines;
    api.logs(name, &lp).await.map_err(FabricError::from)
}
