use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use armada_common::{RequestContextExtractor, response};
use armada_fabric::{ResourceKind, mutate};

use crate::audit::AuditRecord;
use crate::auth::CurrentUser;
use crate::authz::{self, AccessLevel};
use crate::db;
use crate::models::{JobLaunchRequest, JobTemplateCreate};
use crate::server::{AppState, fabric_error, resolve_cluster};

pub async fn list_templates(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    match db::list_job_templates(&state.db, ctx.user_id).await {
        Ok(templates) => Json(templates).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn create_template(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<JobTemplateCreate>,
) -> Response {
    // Validate the YAML now so a broken template can never launch.
    if let Err(e) = serde_yaml::from_str::<Value>(&req.yaml_content) {
        return response::bad_request(anyhow::anyhow!("invalid template yaml: {}", e));
    }
    match db::insert_job_template(&state.db, &req, ctx.user_id).await {
        Ok(template) => Json(template).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    CurrentUser(_ctx): CurrentUser,
) -> Response {
    match db::get_job_template(&state.db, id).await {
        Ok(Some(template)) => Json(template).into_response(),
        Ok(None) => response::not_found(anyhow::anyhow!("template {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    let template = match db::get_job_template(&state.db, id).await {
        Ok(Some(template)) => template,
        Ok(None) => return response::not_found(anyhow::anyhow!("template {} not found", id)),
        Err(e) => return response::internal_server_error(e),
    };
    if template.created_by != ctx.user_id && !authz::can_manage_cluster_registry(&ctx) {
        return response::forbidden(anyhow::anyhow!("not the template owner"));
    }
    match db::delete_job_template(&state.db, id).await {
        Ok(true) => Json(json!({"message": "template deleted"})).into_response(),
        Ok(false) => response::not_found(anyhow::anyhow!("template {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

/// Create a job from a stored template and record it in the job history.
pub async fn launch_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<JobLaunchRequest>,
) -> Response {
    let template = match db::get_job_template(&state.db, id).await {
        Ok(Some(template)) => template,
        Ok(None) => return response::not_found(anyhow::anyhow!("template {} not found", id)),
        Err(e) => return response::internal_server_error(e),
    };
    let cluster = match resolve_cluster(&state, req.cluster_id).await {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    if let Err(denial) =
        authz::authorize(&ctx, AccessLevel::Manage, Some(cluster.id), Some(&req.namespace))
    {
        return response::forbidden(anyhow::anyhow!(denial.0));
    }

    let result = mutate::create_from_yaml(
        &state.pool,
        &state.cache,
        &cluster.to_config(),
        ResourceKind::Job,
        Some(&req.namespace),
        &template.yaml_content,
    )
    .await;

    let job_name = result
        .as_ref()
        .ok()
        .and_then(|v| v.pointer("/metadata/name"))
        .and_then(Value::as_str)
        .unwrap_or(&template.name)
        .to_string();
    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    if success
        && let Err(e) = db::insert_job_history(
            &state.db,
            cluster.id,
            &req.namespace,
            &job_name,
            Some(template.id),
            "Pending",
            ctx.user_id,
        )
        .await
    {
        tracing::warn!(error = %e, "job history insert failed");
    }

    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: Some(ctx.user_id),
                cluster_id: Some(cluster.id),
                action: "job_launch",
                resource_type: ResourceKind::Job.label(),
                resource_name: &job_name,
                details: json!({"namespace": req.namespace, "template_id": template.id}),
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

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
    CurrentUser(_ctx): CurrentUser,
) -> Response {
    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    match db::list_job_history(&state.db, limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}
