use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use armada_common::{RequestContextExtractor, response};

use crate::alerts::WebhookPayload;
use crate::audit::AuditRecord;
use crate::auth::CurrentUser;
use crate::authz::Role;
use crate::db;
use crate::models::AlertRuleCreate;
use crate::server::AppState;

fn require_operator(ctx: &crate::authz::AuthContext) -> Result<(), Response> {
    match ctx.role {
        Role::Admin | Role::Operator => Ok(()),
        _ => Err(response::forbidden(anyhow::anyhow!(
            "operator role required"
        ))),
    }
}

pub async fn list_rules(State(state): State<AppState>, CurrentUser(ctx): CurrentUser) -> Response {
    if let Err(resp) = require_operator(&ctx) {
        return resp;
    }
    match db::list_alert_rules(&state.db, false).await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn create_rule(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<AlertRuleCreate>,
) -> Response {
    if let Err(resp) = require_operator(&ctx) {
        return resp;
    }
    if !matches!(req.rule_type.as_str(), "pod_restart" | "node_unavailable") {
        return response::bad_request(anyhow::anyhow!(
            "unknown rule_type: {}",
            req.rule_type
        ));
    }
    match db::insert_alert_rule(&state.db, &req).await {
        Ok(rule) => Json(rule).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if let Err(resp) = require_operator(&ctx) {
        return resp;
    }
    match db::delete_alert_rule(&state.db, id).await {
        Ok(true) => Json(json!({"message": "rule deleted"})).into_response(),
        Ok(false) => response::not_found(anyhow::anyhow!("rule {} not found", id)),
        Err(e) => response::internal_server_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
    CurrentUser(ctx): CurrentUser,
) -> Response {
    if let Err(resp) = require_operator(&ctx) {
        return resp;
    }
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    match db::list_alert_events(&state.db, limit).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// Public Alertmanager webhook. When a shared secret is configured, the
/// caller must present it in `X-Alert-Secret` or the `token` query param.
pub async fn webhook(
    State(state): State<AppState>,
    Query(q): Query<WebhookQuery>,
    headers: HeaderMap,
    RequestContextExtractor(req_ctx): RequestContextExtractor,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    if let Some(secret) = &state.alert_webhook_secret {
        let presented = headers
            .get("x-alert-secret")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .or(q.token);
        if presented.as_deref() != Some(secret.as_str()) {
            return response::unauthorized(anyhow::anyhow!("unauthorized webhook request"));
        }
    }

    let mut ingested = 0usize;
    for alert in &payload.alerts {
        let status = alert.status.as_deref().unwrap_or("firing");
        let result = db::insert_alert_event(
            &state.db,
            None,
            None,
            &alert.target(),
            &alert.severity(),
            status,
            &alert.message(),
        )
        .await;
        match result {
            Ok(()) => ingested += 1,
            Err(e) => tracing::warn!(error = %e, "webhook alert insert failed"),
        }
    }

    state
        .audit
        .record(
            Some(&req_ctx),
            AuditRecord {
                user_id: None,
                cluster_id: None,
                action: "alert_webhook",
                resource_type: "alert",
                resource_name: "webhook",
                details: json!({"received": payload.alerts.len(), "ingested": ingested}),
                success: ingested == payload.alerts.len(),
                error: None,
            },
        )
        .await;

    Json(json!({"received": payload.alerts.len(), "ingested": ingested})).into_response()
}
