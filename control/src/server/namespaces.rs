use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use armada_common::{RequestContextExtractor, response};
use armada_fabric::{ResourceKind, mutate, read};

use crate::audit::AuditRecord;
use crate::auth::CurrentUser;
use crate::authz::{self, AccessLevel};
use crate::db;
use crate::models::{NamespaceCreate, ResourceQuery};
use crate::server::{AppState, fabric_error, resolve_cluster};

/// Namespaces across one cluster or every active cluster the caller may see.
pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let clusters = match q.cluster_id {
        Some(id) => {
            if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(id), None) {
                return response::forbidden(anyhow::anyhow!(denial.0));
            }
            match resolve_cluster(&state, Some(id)).await {
                Ok(cluster) => vec![cluster],
                Err(resp) => return resp,
            }
        }
        None => {
            let allowed = authz::allowed_cluster_ids(&ctx);
            let clusters = match db::list_clusters(&state.db, allowed.as_deref()).await {
                Ok(clusters) => clusters,
                Err(e) => return response::internal_server_error(e),
            };
            clusters.into_iter().filter(|c| c.is_active).collect()
        }
    };

    let mut out: Vec<Value> = Vec::new();
    for cluster in &clusters {
        match read::namespaces_info(&state.pool, &state.cache, &cluster.to_config()).await {
            Ok(Value::Array(items)) => {
                for mut ns in items {
                    if let Some(map) = ns.as_object_mut() {
                        map.insert("cluster_id".into(), json!(cluster.id));
                        map.insert("cluster_name".into(), json!(cluster.name));
                    }
                    out.push(ns);
                }
            }
            Ok(_) => {}
            Err(e) => {
                // One unreachable cluster must not empty the whole listing.
                tracing::warn!(cluster_id = cluster.id, error = %e, "namespace listing failed");
            }
        }
    }
    Json(out).into_response()
}

pub async fn create(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<NamespaceCreate>,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Manage, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }

    let mut manifest = json!({"metadata": {"name": req.name}});
    if let Some(labels) = &req.labels {
        manifest["metadata"]["labels"] = labels.clone();
    }
    let result = mutate::create_from_value(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Namespace,
        None,
        manifest,
    )
    .await;

    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action: "create",
                resource_type: ResourceKind::Namespace.label(),
                resource_name: &req.name,
                details: json!({"labels": req.labels}),
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

pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ResourceQuery>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    // System namespaces are never deletable, regardless of role. The guard
    // runs before any upstream call is issued.
    if authz::is_protected_namespace(&name) {
        return response::bad_request(anyhow::anyhow!(
            "namespace {} is protected and cannot be deleted",
            name
        ));
    }
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Manage, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }

    let result = mutate::delete(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Namespace,
        None,
        &name,
        false,
    )
    .await;

    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action: "delete",
                resource_type: ResourceKind::Namespace.label(),
                resource_name: &name,
                details: json!({}),
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

/// Counts of the common resources inside one namespace.
pub async fn resources(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), Some(&name)) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::namespace_resources(&state.pool, &cluster.to_config(), &name).await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => fabric_error(e),
    }
}
