use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use armada_common::response;
use armada_fabric::read;

use crate::auth::CurrentUser;
use crate::authz::{self, AccessLevel, Role};
use crate::db;
use crate::models::ResourceQuery;
use crate::server::{AppState, fabric_error, resolve_cluster};

/// Cluster-level counters (nodes, namespaces, pods, services).
pub async fn cluster_stats(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::cluster_stats(&state.pool, &state.cache, &cluster.to_config()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => fabric_error(e),
    }
}

pub async fn nodes(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::nodes_info(&state.pool, &state.cache, &cluster.to_config()).await {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => fabric_error(e),
    }
}

pub async fn node_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::node_detail(&state.pool, &cluster.to_config(), &name).await {
        Ok(mut node) => {
            if let Some(map) = node.as_object_mut() {
                map.insert("cluster_id".into(), json!(cluster.id));
                map.insert("cluster_name".into(), json!(cluster.name));
            }
            Json(node).into_response()
        }
        Err(e) => fabric_error(e),
    }
}

/// Node usage via metrics-server.
pub async fn node_metrics(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::node_metrics(&state.pool, &cluster.to_config()).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => fabric_error(e),
    }
}

/// Pod usage via metrics-server, optionally scoped to a namespace.
pub async fn pod_metrics(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let cluster = match resolve_cluster(&state, q.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) =
        authz::authorize(&ctx, AccessLevel::Read, Some(cluster.id), q.namespace.as_deref())
    {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match read::pod_metrics(&state.pool, &cluster.to_config(), q.namespace.as_deref()).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => fabric_error(e),
    }
}

fn require_admin(ctx: &crate::authz::AuthContext) -> Result<(), Response> {
    if ctx.role == Role::Admin {
        Ok(())
    } else {
        Err(response::forbidden(anyhow::anyhow!(
            "admin role required"
        )))
    }
}

/// Process observability: request metrics, cache state, pool stats, hub and
/// watcher stats. Admin-only.
pub async fn stats(State(state): State<AppState>, CurrentUser(ctx): CurrentUser) -> Response {
    if let Err(resp) = require_admin(&ctx) {
        return resp;
    }
    Json(json!({
        "requests": state.metrics.snapshot(),
        "cache": {"enabled": state.cache.enabled()},
        "k8s_client_pool": state.pool.stats(),
        "websocket": state.hub.stats(),
        "watchers": state.watchers.stats(),
    }))
    .into_response()
}

pub async fn pool_stats(State(state): State<AppState>, CurrentUser(ctx): CurrentUser) -> Response {
    if let Err(resp) = require_admin(&ctx) {
        return resp;
    }
    Json(json!(state.pool.stats())).into_response()
}

pub async fn ws_stats(State(state): State<AppState>, CurrentUser(ctx): CurrentUser) -> Response {
    if let Err(resp) = require_admin(&ctx) {
        return resp;
    }
    let mut stats = state.hub.stats();
    if let Some(map) = stats.as_object_mut() {
        map.insert("connections".into(), state.hub.connections());
    }
    Json(stats).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

pub async fn audit_logs(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if let Err(resp) = require_admin(&ctx) {
        return resp;
    }
    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    match db::list_audit_logs(&state.db, limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}
