use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::json;

use armada_common::response;

use crate::auth::{self, CurrentUser};
use crate::db;
use crate::models::{LoginRequest, TokenResponse};
use crate::server::AppState;

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let user = match db::get_user_by_username(&state.db, &req.username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return response::unauthorized(anyhow::anyhow!("invalid username or password"));
        }
        Err(e) => return response::internal_server_error(e),
    };
    if !auth::verify_password(&req.password, &user.hashed_password) {
        return response::unauthorized(anyhow::anyhow!("invalid username or password"));
    }
    match state.tokens.issue(&user) {
        Ok(access_token) => Json(TokenResponse {
            access_token,
            token_type: "bearer",
            expires_in: state.tokens.expires_in_seconds(),
        })
        .into_response(),
        Err(e) => response::internal_server_error(e),
    }
}

pub async fn me(CurrentUser(ctx): CurrentUser) -> Response {
    Json(json!({
        "user_id": ctx.user_id,
        "username": ctx.username,
        "role": ctx.role,
        "tenant_id": ctx.tenant_id,
        "cluster_grants": ctx.cluster_grants.iter().map(|(id, _)| id).collect::<Vec<_>>(),
    }))
    .into_response()
}
