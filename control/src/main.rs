use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use armada_fabric::pool::PoolConfig;
use armada_fabric::{Cache, ClientPool, EventSink, WatcherManager};

mod alerts;
mod args;
mod audit;
mod auth;
mod authz;
mod background;
mod db;
mod lock;
mod metrics;
mod models;
mod server;
mod ws;

use args::{Cli, Commands, ServerArgs};
use audit::AuditSink;
use auth::TokenAuthority;
use metrics::RequestMetrics;
use server::AppState;
use ws::Hub;

#[tokio::main]
async fn main() -> Result<()> {
    armada_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => run_server(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    armada_common::metrics::maybe_spawn_metrics_server();

    let db = armada_common::postgres::create_pool(&args.database).await;
    db::init_schema(&db).await?;
    db::seed_default_admin(&db).await?;

    let cache = Cache::new(armada_common::redis::init_redis(&args.redis).await);
    let pool = ClientPool::new(PoolConfig::default());
    let hub = Hub::new(args.ws_max_connections);
    let sink: Arc<dyn EventSink> = hub.clone();
    let watchers = WatcherManager::new(pool.clone(), sink);

    let state = AppState {
        db: db.clone(),
        cache,
        pool,
        watchers: watchers.clone(),
        hub: hub.clone(),
        audit: AuditSink::new(db.clone()),
        metrics: RequestMetrics::new(2000),
        tokens: TokenAuthority::new(
            args.auth.jwt_secret(),
            args.auth.access_token_expire_minutes,
        ),
        alert_webhook_secret: args.alert_webhook_secret.clone(),
    };

    // Resume watching every cluster that was active before the restart.
    for cluster in db::list_clusters(&db, None).await? {
        if cluster.is_active {
            watchers.start(cluster.to_config());
        }
    }

    let cancel = CancellationToken::new();
    armada_common::shutdown::cancel_on_signal(cancel.clone());

    let heartbeat = tokio::spawn(hub.clone().run_heartbeat(cancel.child_token()));
    let runner = background::start(&state, &args.background, &args.audit, &cancel);

    let serve_result = server::run_server(&args, state.clone(), cancel.clone()).await;

    // Shutdown: stop the loops, drain the watchers, then let the heartbeat
    // task wind down. The singleton lock releases with the runner.
    cancel.cancel();
    if let Some(runner) = runner {
        runner.shutdown().await;
    }
    state.watchers.stop_all().await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), heartbeat).await;

    serve_result
}
