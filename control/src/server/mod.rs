pub mod alert_routes;
pub mod auth_routes;
pub mod clusters;
pub mod jobs;
pub mod monitoring;
pub mod namespaces;
pub mod resources;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{
    Router, middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use deadpool_postgres::Pool;
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use armada_common::{access_log, cors, response};
use armada_fabric::{Cache, ClientPool, FabricError, WatcherManager};

use crate::args::ServerArgs;
use crate::audit::AuditSink;
use crate::auth::TokenAuthority;
use crate::db;
use crate::metrics::{self, RequestMetrics};
use crate::models::Cluster;
use crate::ws::{self, Hub};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Pool,
    pub cache: Cache,
    pub pool: ClientPool,
    pub watchers: Arc<WatcherManager>,
    pub hub: Arc<Hub>,
    pub audit: AuditSink,
    pub metrics: Arc<RequestMetrics>,
    pub tokens: TokenAuthority,
    pub alert_webhook_secret: Option<String>,
}

/// Map fabric failures onto the HTTP taxonomy. Internal errors stay opaque;
/// the full error is logged by the response helper.
pub fn fabric_error(e: FabricError) -> Response {
    match e.http_status() {
        400 => response::bad_request(anyhow!("{}", e)),
        404 => response::not_found(anyhow!("{}", e)),
        409 => response::conflict(anyhow!("{}", e)),
        502 => response::bad_gateway(anyhow!("{}", e)),
        503 => response::service_unavailable(anyhow!("{}", e)),
        _ => response::internal_server_error(anyhow!("{}", e)),
    }
}

/// Resolve the request's target cluster: an explicit `cluster_id` query, or
/// the single active cluster when the request leaves it ambiguous.
pub async fn resolve_cluster(
    state: &AppState,
    cluster_id: Option<i64>,
) -> Result<Cluster, Response> {
    let found = match cluster_id {
        Some(id) => db::get_cluster(&state.db, id)
            .await
            .map_err(response::internal_server_error)?,
        None => db::get_active_cluster(&state.db)
            .await
            .map_err(response::internal_server_error)?,
    };
    found.ok_or_else(|| match cluster_id {
        Some(id) => response::not_found(anyhow!("cluster {} not found", id)),
        None => response::not_found(anyhow!("no active cluster configured")),
    })
}

async fn health() -> impl IntoResponse {
    "OK"
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Auth
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/me", get(auth_routes::me))
        // Cluster registry
        .route("/clusters", get(clusters::list).post(clusters::create))
        .route(
            "/clusters/{id}",
            get(clusters::get_one)
                .put(clusters::update)
                .delete(clusters::remove),
        )
        .route("/clusters/{id}/test-connection", post(clusters::test_connection))
        .route("/clusters/{id}/activate", post(clusters::activate))
        // Namespaces
        .route("/namespaces", get(namespaces::list).post(namespaces::create))
        .route("/namespaces/{name}", delete(namespaces::remove))
        .route("/namespaces/{name}/resources", get(namespaces::resources))
        // Cluster-level views
        .route("/stats", get(monitoring::cluster_stats))
        .route("/nodes", get(monitoring::nodes))
        .route("/nodes/{name}", get(monitoring::node_detail))
        // Metrics-server views
        .route("/metrics/nodes", get(monitoring::node_metrics))
        .route("/metrics/pods", get(monitoring::pod_metrics))
        // Monitoring / observability
        .route("/monitoring/stats", get(monitoring::stats))
        .route("/monitoring/pool", get(monitoring::pool_stats))
        .route("/monitoring/ws", get(monitoring::ws_stats))
        .route("/audit-logs", get(monitoring::audit_logs))
        // Alerts
        .route(
            "/alerts/rules",
            get(alert_routes::list_rules).post(alert_routes::create_rule),
        )
        .route("/alerts/rules/{id}", delete(alert_routes::delete_rule))
        .route("/alerts/events", get(alert_routes::list_events))
        .route("/alerts/webhook", post(alert_routes::webhook))
        // Job templates and history
        .route(
            "/job-templates",
            get(jobs::list_templates).post(jobs::create_template),
        )
        .route(
            "/job-templates/{id}",
            get(jobs::get_template).delete(jobs::delete_template),
        )
        .route("/job-templates/{id}/launch", post(jobs::launch_template))
        .route("/job-history", get(jobs::history))
        // Pod and deployment extras
        .route("/pods/batch-delete", post(resources::batch_delete_pods))
        .route("/pods/batch-restart", post(resources::batch_restart_pods))
        .route("/pods/{a}/{b}/logs", get(resources::pod_logs))
        .route("/pods/{a}/{b}/restart", post(resources::restart_pod))
        .route("/deployments/{a}/{b}/scale", post(resources::scale_workload))
        .route(
            "/deployments/{a}/{b}/restart",
            post(resources::restart_workload),
        )
        .route("/deployments/{a}/{b}/image", post(resources::set_image))
        .route("/jobs/{a}/{b}/restart", post(resources::restart_job))
        // Live updates
        .route("/ws", get(ws::ws_handler))
        // Generic per-kind read/mutation family. One implementation, the
        // kind rides in the path.
        .route("/{kind}", get(resources::list).post(resources::create))
        .route(
            "/{kind}/{a}",
            get(resources::get_cluster_scoped).delete(resources::delete_cluster_scoped),
        )
        .route(
            "/{kind}/{a}/yaml",
            get(resources::yaml_cluster_scoped).put(resources::replace_cluster_scoped),
        )
        .route(
            "/{kind}/{a}/{b}",
            get(resources::get_namespaced).delete(resources::delete_namespaced),
        )
        .route(
            "/{kind}/{a}/{b}/yaml",
            get(resources::yaml_namespaced).put(resources::replace_namespaced),
        );

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::observe_requests,
        ))
        .layer(middleware::from_fn(
            armada_common::middleware::create_context,
        ))
        .layer(middleware::from_fn(access_log::public_error_only))
        .with_state(state)
}

pub async fn run_server(
    args: &ServerArgs,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let allowed_hosts = Arc::new(args.cors.hosts());
    let app = build_router(state)
        .layer(armada_common::metrics::MetricsLayer)
        .layer(middleware::from_fn_with_state(
            allowed_hosts,
            armada_common::trusted_hosts::check,
        ))
        .layer(cors::from_origins(&args.cors.origins()));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API server to {}", addr))?;
    println!(
        "{}{}",
        "🚀 Starting control-plane API • addr=".green(),
        addr.green().dimmed(),
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancel.cancelled().await;
    })
    .await
    .context("API server failed")?;

    println!("{}", "🛑 API server stopped gracefully".red());
    Ok(())
}
