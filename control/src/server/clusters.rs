use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde_json::json;

use armada_common::{RequestContextExtractor, response};

use crate::audit::AuditRecord;
use crate::auth::CurrentUser;
use crate::authz::{self, AccessLevel};
use crate::db;
use crate::models::{ClusterCreate, ClusterUpdate};
use crate::server::{AppState, fabric_error};

const CLUSTER_LIST_KEY: &str = "cluster_list:all";

/// List clusters the caller may see. Viewers get only their granted ids and
/// bypass the shared cache; everyone else sees the (cached) full registry.
pub async fn list(State(state): State<AppState>, CurrentUser(ctx): CurrentUser) -> Response {
    let allowed = authz::allowed_cluster_ids(&ctx);
    if let Some(ids) = &allowed {
        if ids.is_empty() {
            return Json(Vec::<serde_json::Value>::new()).into_response();
        }
    } else if let Some(cached) = state.cache.get(CLUSTER_LIST_KEY).await {
        return Json(cached).into_response();
    }

    match db::list_clusters(&state.db, allowed.as_deref()).await {
        Ok(clusters) => {
            let body = json!(
                clusters
                    .iter()
                    .map(|c| c.to_response())
                    .collect::<Vec<_>>()
            );
            if allowed.is_none() {
                state
                    .cache
                    .set(CLUSTER_LIST_KEY, &body, armada_fabric::cache::ttl::CLUSTER_LIST)
                    .await;
            }
            Json(body).into_response()
        }
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    match db::get_cluster(&state.db, id).await {
        Ok(Some(cluster)) => Json(cluster.to_response()).into_response(),
        Ok(None) => response::not_found(anyhow::anyhow!("cluster {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

fn validate_credentials(auth_type: &str, req: &ClusterCreate) -> Result<(), Response> {
    match auth_type {
        "kubeconfig" if req.kubeconfig_content.is_none() => Err(response::bad_request(
            anyhow::anyhow!("kubeconfig auth requires kubeconfig_content"),
        )),
        "token" if req.token.is_none() => Err(response::bad_request(anyhow::anyhow!(
            "token auth requires a token"
        ))),
        "kubeconfig" | "token" => Ok(()),
        other => Err(response::bad_request(anyhow::anyhow!(
            "unknown auth_type: {}",
            other
        ))),
    }
}

pub async fn create(
    State(state): State<AppState>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<ClusterCreate>,
) -> Response {
    if !authz::can_manage_cluster_registry(&ctx) {
        return response::forbidden(anyhow::anyhow!("cluster registry writes require admin"));
    }
    if let Err(resp) = validate_credentials(&req.auth_type, &req) {
        return resp;
    }
    match db::cluster_name_exists(&state.db, &req.name, None).await {
        Ok(true) => {
            return response::bad_request(anyhow::anyhow!("cluster name already exists"));
        }
        Ok(false) => {}
        Err(e) => return response::internal_server_error(e),
    }

    let result = db::insert_cluster(&state.db, &req).await;
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
                cluster_id: result.as_ref().ok().map(|c| c.id),
                action: "cluster_create",
                resource_type: "cluster",
                resource_name: &req.name,
                details: json!({"endpoint": req.endpoint, "auth_type": req.auth_type}),
                success,
                error,
            },
        )
        .await;

    match result {
        Ok(cluster) => {
            state.cache.delete_pattern("cluster_list:*").await;
            if cluster.is_active {
                state.watchers.start(cluster.to_config());
            }
            Json(cluster.to_response()).into_response()
        }
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<ClusterUpdate>,
) -> Response {
    if !authz::can_manage_cluster_registry(&ctx) {
        return response::forbidden(anyhow::anyhow!("cluster registry writes require admin"));
    }
    if let Some(ref name) = req.name {
        match db::cluster_name_exists(&state.db, name, Some(id)).await {
            Ok(true) => {
                return response::bad_request(anyhow::anyhow!("cluster name already exists"));
            }
            Ok(false) => {}
            Err(e) => return response::internal_server_error(e),
        }
    }

    let result = db::update_cluster(&state.db, id, &req).await;
    let (success, error) = match &result {
        Ok(Some(_)) => (true, None),
        Ok(None) => (false, Some("not found".to_string())),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(id),
                action: "cluster_update",
                resource_type: "cluster",
                resource_name: req.name.as_deref().unwrap_or(""),
                details: json!({"is_active": req.is_active}),
                success,
                error,
            },
        )
        .await;

    match result {
        Ok(Some(cluster)) => {
            state.cache.delete_pattern("cluster_list:*").await;
            // Credentials may have changed; retire any cached clients.
            state.pool.evict_cluster(id);
            if req.is_active == Some(false) {
                state.watchers.stop(id).await;
            } else if cluster.is_active {
                state.watchers.start(cluster.to_config());
            }
            Json(cluster.to_response()).into_response()
        }
        Ok(None) => response::not_found(anyhow::anyhow!("cluster {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if !authz::can_manage_cluster_registry(&ctx) {
        return response::forbidden(anyhow::anyhow!("cluster registry writes require admin"));
    }

    // Deletion cascades: the watcher stops and the pool drains before the
    // registry row goes away.
    state.watchers.stop(id).await;
    state.pool.evict_cluster(id);
    state.cache.delete_pattern("cluster_list:*").await;
    state
        .cache
        .delete_pattern(&format!("k8s:*:cluster:{}:*", id))
        .await;

    let result = db::delete_cluster(&state.db, id).await;
    let (success, error) = match &result {
        Ok(true) => (true, None),
        Ok(false) => (false, Some("not found".to_string())),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(id),
                action: "cluster_delete",
                resource_type: "cluster",
                resource_name: &id.to_string(),
                details: json!({}),
                success,
                error,
            },
        )
        .await;

    match result {
        Ok(true) => Json(json!({"message": "cluster deleted"})).into_response(),
        Ok(false) => response::not_found(anyhow::anyhow!("cluster {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if let Err(denial) = authz::authorize(&ctx, AccessLevel::Read, Some(id), None) {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }
    let cluster = match db::get_cluster(&state.db, id).await {
        Ok(Some(cluster)) => cluster,
        Ok(None) => return response::not_found(anyhow::anyhow!("cluster {} not found", id)),
        Err(e) => return response::internal_server_error(e),
    };
    match state.pool.test_connection(&cluster.to_config()).await {
        Ok(version) => Json(json!({
            "success": true,
            "message": "connection ok",
            "version": version,
        }))
        .into_response(),
        Err(e) => fabric_error(e),
    }
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if !authz::can_manage_cluster_registry(&ctx) {
        return response::forbidden(anyhow::anyhow!("cluster registry writes require admin"));
    }
    let result = db::activate_cluster(&state.db, id).await;
    let (success, error) = match &result {
        Ok(Some(_)) => (true, None),
        Ok(None) => (false, Some("not found".to_string())),
        Err(e) => (false, Some(e.to_string())),
    };
    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(id),
                action: "cluster_activate",
                resource_type: "cluster",
                resource_name: &id.to_string(),
                details: json!({}),
                success,
                error,
            },
        )
        .await;
    match result {
        Ok(Some(cluster)) => {
            state.cache.delete_pattern("cluster_list:*").await;
            state.watchers.start(cluster.to_config());
            Json(cluster.to_response()).into_response()
        }
        Ok(None) => response::not_found(anyhow::anyhow!("cluster {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}
