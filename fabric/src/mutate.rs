use std::collections::HashMap;

use chrono::Utc;
use either::Either;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use serde::Serialize;
use serde_json::{Value, json};

use crate::cache::{self, Cache};
use crate::error::{FabricError, FabricResult};
use crate::kinds::ResourceKind;
use crate::normalize;
use crate::pool::ClientPool;
use crate::read::dyn_api;
use crate::ClusterConfig;

/// Clear every cache key the mutation may have staled. Runs before the
/// outcome is returned so readers never see a pre-mutation snapshot served
/// from cache after the call completed.
async fn invalidate(cache: &Cache, kind: ResourceKind, cluster_id: i64) {
    for pattern in cache::invalidation_patterns(kind.label(), cluster_id) {
        cache.delete_pattern(&pattern).await;
    }
}

/// Parse a YAML manifest and normalize its identity fields. The URL is
/// authoritative for namespace (and, on update, name); a stray value inside
/// the document must not redirect the mutation.
pub(crate) fn prepare_manifest(
    kind: ResourceKind,
    namespace: Option<&str>,
    forced_name: Option<&str>,
    yaml: &str,
) -> FabricResult<Value> {
    let mut doc: Value = serde_yaml::from_str(yaml)?;
    if !doc.is_object() {
        return Err(FabricError::Serialization(
            "manifest must be a YAML mapping".into(),
        ));
    }
    normalize_manifest(kind, namespace, forced_name, &mut doc);
    Ok(doc)
}

fn normalize_manifest(
    kind: ResourceKind,
    namespace: Option<&str>,
    forced_name: Option<&str>,
    doc: &mut Value,
) {
    let ar = kind.api_resource();
    doc["apiVersion"] = json!(ar.api_version);
    doc["kind"] = json!(ar.kind);
    if !doc.get("metadata").map(Value::is_object).unwrap_or(false) {
        doc["metadata"] = json!({});
    }
    if kind.namespaced()
        && let Some(ns) = namespace
    {
        doc["metadata"]["namespace"] = json!(ns);
    }
    if let Some(name) = forced_name {
        doc["metadata"]["name"] = json!(name);
    }
    if let Some(map) = doc.as_object_mut() {
        map.remove("status");
    }
}

fn to_dynamic(doc: Value) -> FabricResult<DynamicObject> {
    serde_json::from_value(doc).map_err(FabricError::from)
}

/// Create from a structured manifest.
pub async fn create_from_value(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    mut manifest: Value,
) -> FabricResult<Value> {
    if !manifest.is_object() {
        return Err(FabricError::Validation("manifest must be an object".into()));
    }
    normalize_manifest(kind, namespace, None, &mut manifest);
    let obj = to_dynamic(manifest)?;
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let created = api
        .create(&PostParams::default(), &obj)
        .await
        .map_err(FabricError::from)?;
    invalidate(cache, kind, cluster.id).await;
    Ok(normalize::sanitize(&serde_json::to_value(&created)?))
}

/// Create from a YAML document, with the URL namespace overriding whatever
/// the document carries.
pub async fn create_from_yaml(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    yaml: &str,
) -> FabricResult<Value> {
    let doc = prepare_manifest(kind, namespace, None, yaml)?;
    create_from_value(pool, cache, cluster, kind, namespace, doc).await
}

/// Replace from a YAML document. The URL name and namespace are forced onto
/// the manifest; a missing resourceVersion is filled from the live object so
/// the replace does not bounce off the conflict check.
pub async fn replace_from_yaml(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    yaml: &str,
) -> FabricResult<Value> {
    let mut doc = prepare_manifest(kind, namespace, Some(name), yaml)?;
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);

    if doc["metadata"].get("resourceVersion").is_none() {
        let live = api.get(name).await.map_err(FabricError::from)?;
        if let Some(rv) = live.metadata.resource_version {
            doc["metadata"]["resourceVersion"] = json!(rv);
        }
    }

    let obj = to_dynamic(doc)?;
    let replaced = api
        .replace(name, &PostParams::default(), &obj)
        .await
        .map_err(FabricError::from)?;
    invalidate(cache, kind, cluster.id).await;
    Ok(normalize::sanitize(&serde_json::to_value(&replaced)?))
}

/// Patch the scale subresource; fall back to `.spec.replicas` for kinds
/// that serve replicas without the subresource.
pub async fn scale(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    replicas: i32,
) -> FabricResult<Value> {
    if !kind.scalable() {
        return Err(FabricError::Validation(format!(
            "{} is not scalable",
            kind.label()
        )));
    }
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let pp = PatchParams::default();
    let payload = json!({"spec": {"replicas": replicas}});
    if let Err(e) = api.patch_scale(name, &pp, &Patch::Merge(&payload)).await {
        tracing::warn!(error = %e, "patch_scale failed; falling back to spec.replicas");
        api.patch(name, &pp, &Patch::Merge(&payload))
            .await
            .map_err(FabricError::from)?;
    }
    invalidate(cache, kind, cluster.id).await;
    Ok(json!({"name": name, "replicas": replicas}))
}

/// Rolling restart: bump only the pod-template restart annotation, leaving
/// images and replica counts untouched. The controller does the rest.
pub async fn rolling_restart(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> FabricResult<Value> {
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let ts = Utc::now().to_rfc3339();
    let patch = json!({
        "spec": {"template": {"metadata": {"annotations": {
            "kubectl.kubernetes.io/restartedAt": ts
        }}}}
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(FabricError::from)?;
    invalidate(cache, kind, cluster.id).await;
    Ok(json!({"name": name, "restarted_at": ts}))
}

/// Swap one container's image on a deployment.
pub async fn set_image(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    namespace: &str,
    name: &str,
    container: &str,
    image: &str,
) -> FabricResult<Value> {
    let kind = ResourceKind::Deployment;
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, Some(namespace));
    let live = api.get(name).await.map_err(FabricError::from)?;
    let mut value = serde_json::to_value(&live)?;

    let containers = value
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| FabricError::Internal("deployment has no containers".into()))?;
    let target = containers
        .iter_mut()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(container))
        .ok_or_else(|| FabricError::NotFound(format!("container {} not found", container)))?;
    target["image"] = json!(image);

    let patch = json!({
        "spec": {"template": {"spec": {"containers": containers}}}
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(FabricError::from)?;
    invalidate(cache, kind, cluster.id).await;
    Ok(json!({"name": name, "container": container, "image": image}))
}

/// Delete one object; `force` requests immediate termination (grace 0).
pub async fn delete(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    force: bool,
) -> FabricResult<Value> {
    let handle = pool.borrow(cluster).await?;
    let api = dyn_api(handle.client(), kind, namespace);
    let dp = if force {
        DeleteParams::default().grace_period(0)
    } else {
        DeleteParams::default()
    };
    let outcome = api.delete(name, &dp).await.map_err(FabricError::from)?;
    invalidate(cache, kind, cluster.id).await;
    match outcome {
        Either::Left(obj) => Ok(normalize::sanitize(&serde_json::to_value(&obj)?)),
        Either::Right(status) => Ok(serde_json::to_value(&status)?),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: HashMap<String, bool>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Delete a list of pods one by one. A failing element never aborts the
/// batch; the caller gets the per-pod outcome map.
pub async fn batch_delete_pods(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    pods: &[(String, String)],
    force: bool,
) -> BatchOutcome {
    let mut results = HashMap::new();
    for (namespace, name) in pods {
        let ok = delete(
            pool,
            cache,
            cluster,
            ResourceKind::Pod,
            Some(namespace),
            name,
            force,
        )
        .await
        .map_err(|e| {
            tracing::warn!(%namespace, %name, error = %e, "batch pod delete failed");
            e
        })
        .is_ok();
        results.insert(format!("{}/{}", namespace, name), ok);
    }
    let success_count = results.values().filter(|ok| **ok).count();
    BatchOutcome {
        failure_count: results.len() - success_count,
        success_count,
        results,
    }
}

/// Restarting a pod is deleting it; the owning controller brings up the
/// replacement.
pub async fn batch_restart_pods(
    pool: &ClientPool,
    cache: &Cache,
    cluster: &ClusterConfig,
    pods: &[(String, String)],
) -> BatchOutcome {
    batch_delete_pods(pool, cache, cluster, pods, false).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_namespace_is_overridden_from_the_url() {
        let doc = prepare_manifest(
            ResourceKind::Deployment,
            Some("prod"),
            None,
            "metadata:\n  name: api\n  namespace: someone-elses\nspec:\n  replicas: 2\n",
        )
        .unwrap();
        assert_eq!(doc["metadata"]["namespace"], "prod");
        assert_eq!(doc["metadata"]["name"], "api");
        assert_eq!(doc["apiVersion"], "apps/v1");
        assert_eq!(doc["kind"], "Deployment");
    }

    #[test]
    fn update_forces_the_url_name_and_strips_status() {
        let doc = prepare_manifest(
            ResourceKind::Service,
            Some("default"),
            Some("frontend"),
            "metadata:\n  name: renamed\nstatus:\n  loadBalancer: {}\nspec:\n  type: ClusterIP\n",
        )
        .unwrap();
        assert_eq!(doc["metadata"]["name"], "frontend");
        assert!(doc.get("status").is_none());
    }

    #[test]
    fn non_mapping_yaml_is_a_serialization_error() {
        let err = prepare_manifest(ResourceKind::Pod, Some("default"), None, "- just\n- a list\n")
            .unwrap_err();
        assert!(matches!(err, FabricError::Serialization(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn cluster_scoped_manifest_gets_no_namespace() {
        let doc = prepare_manifest(
            ResourceKind::Namespace,
            Some("ignored"),
            None,
            "metadata:\n  name: team-a\n",
        )
        .unwrap();
        assert!(doc["metadata"].get("namespace").is_none());
        assert_eq!(doc["kind"], "Namespace");
    }
}
