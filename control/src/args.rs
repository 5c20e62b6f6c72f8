use armada_common::args::{AuditArgs, AuthArgs, BackgroundArgs, CorsArgs, DatabaseArgs, RedisArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "armada-control")]
#[command(about = "Multi-cluster Kubernetes management control plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control-plane server
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port the API and WebSocket surface listens on
    #[arg(long, env = "APP_PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// WebSocket connection registry bound
    #[arg(long, env = "WS_MAX_CONNECTIONS", default_value_t = 1000)]
    pub ws_max_connections: usize,

    /// Shared secret for the public alert webhook; unset disables the check
    #[arg(long, env = "ALERT_WEBHOOK_SECRET")]
    pub alert_webhook_secret: Option<String>,

    #[clap(flatten)]
    pub database: DatabaseArgs,

    #[clap(flatten)]
    pub redis: RedisArgs,

    #[clap(flatten)]
    pub auth: AuthArgs,

    #[clap(flatten)]
    pub cors: CorsArgs,

    #[clap(flatten)]
    pub background: BackgroundArgs,

    #[clap(flatten)]
    pub audit: AuditArgs,
}
