use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};

use armada_common::{RequestContext, RequestContextExtractor, response};
use armada_fabric::read::{self, ListOptions};
use armada_fabric::{FabricError, ResourceKind, mutate};

use crate::audit::AuditRecord;
use crate::auth::CurrentUser;
use crate::authz::{self, AccessLevel, AuthContext};
use crate::models::{
    BatchPodRequest, Cluster, ImageRequest, ResourceQuery, ScaleRequest, YamlBody,
};
use crate::server::{AppState, fabric_error, resolve_cluster};

fn parse_kind(label: &str) -> Result<ResourceKind, Response> {
    label
        .parse::<ResourceKind>()
        .map_err(|e| response::not_found(anyhow::anyhow!(e)))
}

fn check(
    ctx: &AuthContext,
    level: AccessLevel,
    cluster_id: i64,
    namespace: Option<&str>,
) -> Result<(), Response> {
    authz::authorize(ctx, level, Some(cluster_id), namespace)
        .map_err(|denial| response::forbidden(anyhow::anyhow!(denial.0)))
}

/// Audit one mutation, success or failure, then produce the HTTP response.
#[allow(clippy::too_many_arguments)]
async fn finish_mutation(
    state: &AppState,
    ctx: &AuthContext,
    req: &RequestContext,
    cluster: &Cluster,
    action: &str,
    kind: ResourceKind,
    resource_name: &str,
    details: Value,
    result: Result<Value, FabricError>,
) -> Response {
    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(req),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action,
                resource_type: kind.label(),
                resource_name,
                details,
                success,
                error,
            },
        )
        .await;
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => fabric_error(e),
    }
}

// ---------------------------------------------------------------------------
// Generic read family
// ---------------------------------------------------------------------------

pub async fn list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Read, cluster.id, q.namespace.as_deref()) {
        return resp;
    }

    let limit = q.limit.unwrap_or(200);
    let opts = ListOptions {
        limit,
        continue_token: q.continue_token.clone(),
        label_selector: q.label_selector.clone(),
        field_selector: q.field_selector.clone(),
    };
    match read::list_page(
        &state.pool,
        &cluster.to_config(),
        kind,
        q.namespace.as_deref(),
        &opts,
    )
    .await
    {
        Ok(page) => Json(json!({
            "items": page.items,
            "continue_token": page.continue_token,
            "limit": limit,
            "cluster_id": cluster.id,
            "cluster_name": cluster.name,
        }))
        .into_response(),
        Err(e) => fabric_error(e),
    }
}

async fn detail_common(
    state: AppState,
    ctx: AuthContext,
    kind: String,
    namespace: Option<String>,
    name: String,
    q: ResourceQuery,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Read, cluster.id, namespace.as_deref()) {
        return resp;
    }
    match read::detail(
        &state.pool,
        &cluster.to_config(),
        kind,
        namespace.as_deref(),
        &name,
    )
    .await
    {
        Ok(mut detail) => {
            if let Some(map) = detail.as_object_mut() {
                map.insert("cluster_id".into(), json!(cluster.id));
                map.insert("cluster_name".into(), json!(cluster.name));
            }
            Json(detail).into_response()
        }
        Err(e) => fabric_error(e),
    }
}

pub async fn get_namespaced(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    detail_common(state, ctx, kind, Some(namespace), name, q).await
}

pub async fn get_cluster_scoped(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    detail_common(state, ctx, kind, None, name, q).await
}

async fn yaml_common(
    state: AppState,
    ctx: AuthContext,
    kind: String,
    namespace: Option<String>,
    name: String,
    q: ResourceQuery,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Read, cluster.id, namespace.as_deref()) {
        return resp;
    }
    match read::yaml(
        &state.pool,
        &cluster.to_config(),
        kind,
        namespace.as_deref(),
        &name,
    )
    .await
    {
        Ok(yaml) => yaml.into_response(),
        Err(e) => fabric_error(e),
    }
}

pub async fn yaml_namespaced(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    yaml_common(state, ctx, kind, Some(namespace), name, q).await
}

pub async fn yaml_cluster_scoped(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    yaml_common(state, ctx, kind, None, name, q).await
}

// ---------------------------------------------------------------------------
// Generic mutation family
// ---------------------------------------------------------------------------

pub async fn create(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<YamlBody>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, q.namespace.as_deref()) {
        return resp;
    }

    let result = mutate::create_from_yaml(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        kind,
        q.namespace.as_deref(),
        &body.yaml,
    )
    .await;
    let name = result
        .as_ref()
        .ok()
        .and_then(|v| v.pointer("/metadata/name"))
        .and_then(Value::as_str)
        .unwrap_or("(from yaml)")
        .to_string();
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "create",
        kind,
        &name,
        json!({"namespace": q.namespace}),
        result,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn replace_common(
    state: AppState,
    ctx: AuthContext,
    req: RequestContext,
    kind: String,
    namespace: Option<String>,
    name: String,
    q: ResourceQuery,
    body: YamlBody,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, namespace.as_deref()) {
        return resp;
    }
    let result = mutate::replace_from_yaml(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        kind,
        namespace.as_deref(),
        &name,
        &body.yaml,
    )
    .await;
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "update",
        kind,
        &name,
        json!({"namespace": namespace, "source": "yaml"}),
        result,
    )
    .await
}

pub async fn replace_namespaced(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<YamlBody>,
) -> Response {
    replace_common(state, ctx, req, kind, Some(namespace), name, q, body).await
}

pub async fn replace_cluster_scoped(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<YamlBody>,
) -> Response {
    replace_common(state, ctx, req, kind, None, name, q, body).await
}

#[allow(clippy::too_many_arguments)]
async fn delete_common(
    state: AppState,
    ctx: AuthContext,
    req: RequestContext,
    kind: String,
    namespace: Option<String>,
    name: String,
    q: ResourceQuery,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, namespace.as_deref()) {
        return resp;
    }
    let result = mutate::delete(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        kind,
        namespace.as_deref(),
        &name,
        q.force,
    )
    .await;
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "delete",
        kind,
        &name,
        json!({"namespace": namespace, "force": q.force}),
        result,
    )
    .await
}

pub async fn delete_namespaced(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    delete_common(state, ctx, req, kind, Some(namespace), name, q).await
}

pub async fn delete_cluster_scoped(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    delete_common(state, ctx, req, kind, None, name, q).await
}

// ---------------------------------------------------------------------------
// Pod extras
// ---------------------------------------------------------------------------

/// Pod logs are a privileged read; every access lands in the audit trail.
pub async fn pod_logs(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Read, cluster.id, Some(&namespace)) {
        return resp;
    }
    let result = read::pod_logs(
        &state.pool,
        &cluster.to_config(),
        &namespace,
        &name,
        q.container.as_deref(),
        q.tail_lines.or(Some(100)),
    )
    .await;
    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action: "logs_view",
                resource_type: ResourceKind::Pod.label(),
                resource_name: &name,
                details: json!({"namespace": namespace, "container": q.container}),
                success,
                error,
            },
        )
        .await;
    match result {
        Ok(logs) => logs.into_response(),
        Err(e) => fabric_error(e),
    }
}

/// Restarting a pod deletes it; its controller replaces it.
pub async fn restart_pod(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, Some(&namespace)) {
        return resp;
    }
    let result = mutate::delete(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Pod,
        Some(&namespace),
        &name,
        false,
    )
    .await
    .map(|_| json!({"message": format!("pod {}/{} restarting", namespace, name)}));
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "restart",
        ResourceKind::Pod,
        &name,
        json!({"namespace": namespace}),
        result,
    )
    .await
}

async fn batch_pods(
    state: AppState,
    ctx: AuthContext,
    req: RequestContext,
    body: BatchPodRequest,
    restart: bool,
) -> Response {
    let cluster = match resolve_cluster(&state, body.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };

    // Per-pod authorization: a denied element fails that element only.
    let mut denied: Vec<(String, String)> = Vec::new();
    let mut allowed: Vec<(String, String)> = Vec::new();
    for pod in &body.pods {
        let target = (pod.namespace.clone(), pod.name.clone());
        if authz::authorize(
            &ctx,
            AccessLevel::Manage,
            Some(cluster.id),
            Some(&pod.namespace),
        )
        .is_ok()
        {
            allowed.push(target);
        } else {
            denied.push(target);
        }
    }

    let config = cluster.to_config();
    let mut outcome = if restart {
        mutate::batch_restart_pods(&state.pool, &state.cache, &config, &allowed).await
    } else {
        mutate::batch_delete_pods(&state.pool, &state.cache, &config, &allowed, body.force).await
    };
    for (namespace, name) in denied {
        outcome
            .results
            .insert(format!("{}/{}", namespace, name), false);
        outcome.failure_count += 1;
    }

    let action = if restart { "batch_restart" } else { "batch_delete" };
    state
        .audit
        .record(
            Some(&req),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action,
                resource_type: ResourceKind::Pod.label(),
                resource_name: &format!("{} pods", body.pods.len()),
                details: json!({
                    "requested": body.pods.len(),
                    "success_count": outcome.success_count,
                    "failure_count": outcome.failure_count,
                    "force": body.force,
                }),
                success: outcome.failure_count == 0,
                error: None,
            },
        )
        .await;

    Json(json!({
        "results": outcome.results,
        "success_count": outcome.success_count,
        "failure_count": outcome.failure_count,
    }))
    .into_response()
}

pub async fn batch_delete_pods(
    State(state): State<AppState>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<BatchPodRequest>,
) -> Response {
    batch_pods(state, ctx, req, body, false).await
}

pub async fn batch_restart_pods(
    State(state): State<AppState>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<BatchPodRequest>,
) -> Response {
    batch_pods(state, ctx, req, body, true).await
}

// ---------------------------------------------------------------------------
// Deployment extras
// ---------------------------------------------------------------------------

pub async fn scale_workload(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<ScaleRequest>,
) -> Response {
    if body.replicas < 0 {
        return response::bad_request(anyhow::anyhow!("replicas must be non-negative"));
    }
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, Some(&namespace)) {
        return resp;
    }
    let result = mutate::scale(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Deployment,
        Some(&namespace),
        &name,
        body.replicas,
    )
    .await;
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "scale",
        ResourceKind::Deployment,
        &name,
        json!({"namespace": namespace, "replicas": body.replicas}),
        result,
    )
    .await
}

pub async fn restart_workload(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, Some(&namespace)) {
        return resp;
    }
    let result = mutate::rolling_restart(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Deployment,
        Some(&namespace),
        &name,
    )
    .await;
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "restart",
        ResourceKind::Deployment,
        &name,
        json!({"namespace": namespace}),
        result,
    )
    .await
}

pub async fn set_image(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<ImageRequest>,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, Some(&namespace)) {
        return resp;
    }
    let result = mutate::set_image(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        &namespace,
        &name,
        &body.container,
        &body.image,
    )
    .await;
    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "set_image",
        ResourceKind::Deployment,
        &name,
        json!({"namespace": namespace, "container": body.container, "image": body.image}),
        result,
    )
    .await
}

// ---------------------------------------------------------------------------
// Job extras
// ---------------------------------------------------------------------------

/// Restart a job by cloning its spec under a timestamped name. Jobs are
/// immutable, so this is the only restart the upstream API allows.
pub async fn restart_job(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(resp) = check(&ctx, AccessLevel::Manage, cluster.id, Some(&namespace)) {
        return resp;
    }
    let config = cluster.to_config();

    let result = async {
        let live = read::detail(
            &state.pool,
            &config,
            ResourceKind::Job,
            Some(&namespace),
            &name,
        )
        .await?;
        let object = live.get("object").cloned().unwrap_or(Value::Null);
        let new_name = format!("{}-{}", name, Utc::now().timestamp());
        let manifest = clone_job_manifest(&object, &new_name);
        mutate::create_from_value(
            &state.pool,
            &state.cache,
            &config,
            ResourceKind::Job,
            Some(&namespace),
            manifest,
        )
        .await?;
        Ok::<Value, FabricError>(json!({
            "message": format!("job {} restarted", name),
            "new_job_name": new_name,
        }))
    }
    .await;

    finish_mutation(
        &state,
        &ctx,
        &req,
        &cluster,
        "restart",
        ResourceKind::Job,
        &name,
        json!({"namespace": namespace}),
        result,
    )
    .await
}

/// Strip the server-owned and controller-written fields so the clone is
/// admissible as a fresh job.
fn clone_job_manifest(object: &Value, new_name: &str) -> Value {
    let mut spec = object.get("spec").cloned().unwrap_or_else(|| json!({}));
    if let Some(map) = spec.as_object_mut() {
        map.remove("selector");
    }
    if let Some(labels) = spec
        .pointer_mut("/template/metadata/labels")
        .and_then(Value::as_object_mut)
    {
        strip_controller_labels(labels);
    }
    let mut labels = object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    strip_controller_labels(&mut labels);
    json!({
        "metadata": {
            "name": new_name,
            "labels": labels,
            "annotations": object.pointer("/metadata/annotations").cloned().unwrap_or(json!({})),
        },
        "spec": spec,
    })
}

fn strip_controller_labels(labels: &mut serde_json::Map<String, Value>) {
    labels.remove("controller-uid");
    labels.remove("batch.kubernetes.io/controller-uid");
    labels.remove("job-name");
    labels.remove("batch.kubernetes.io/job-name");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_clone_strips_controller_identity() {
        let object = json!({
            "metadata": {
                "name": "backup",
                "labels": {"app": "backup", "controller-uid": "abc"},
                "uid": "abc",
                "resourceVersion": "99",
            },
            "spec": {
                "selector": {"matchLabels": {"controller-uid": "abc"}},
                "template": {
                    "metadata": {"labels": {
                        "app": "backup",
                        "controller-uid": "abc",
                        "job-name": "backup",
                    }},
                    "spec": {"containers": []},
                },
                "backoffLimit": 4,
            },
        });
        let clone = clone_job_manifest(&object, "backup-1700000000");
        assert_eq!(clone["metadata"]["name"], "backup-1700000000");
        assert!(clone["spec"].get("selector").is_none());
        let labels = &clone["spec"]["template"]["metadata"]["labels"];
        assert!(labels.get("controller-uid").is_none());
        assert!(labels.get("job-name").is_none());
        assert_eq!(labels["app"], "backup");
        assert_eq!(clone["spec"]["backoffLimit"], 4);
        // Top-level labels ride along minus controller identity; server-owned
        // metadata does not.
        assert_eq!(clone["metadata"]["labels"]["app"], "backup");
        assert!(clone["metadata"]["labels"].get("controller-uid").is_none());
        assert!(clone["metadata"].get("uid").is_none());
        assert!(clone["metadata"].get("resourceVersion").is_none());
    }
}
