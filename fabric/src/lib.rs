//! Cluster fabric: authenticated client pooling, normalized reads and
//! mutations, live resource watching, and the cache in front of them.

pub mod cache;
pub mod error;
pub mod kinds;
pub mod mutate;
pub mod normalize;
pub mod pool;
pub mod read;
pub mod watch;

pub use cache::Cache;
pub use error::{FabricError, FabricResult};
pub use kinds::ResourceKind;
pub use pool::ClientPool;
pub use watch::{EventSink, WatcherManager};

use serde::{Deserialize, Serialize};

/// How the fabric authenticates against one managed cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Kubeconfig,
    Token,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Kubeconfig => "kubeconfig",
            AuthMode::Token => "token",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "kubeconfig" => Some(AuthMode::Kubeconfig),
            "token" => Some(AuthMode::Token),
            _ => None,
        }
    }
}

/// Descriptor of one managed cluster, as stored in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub auth_mode: AuthMode,
    /// Full kubeconfig document (kubeconfig auth).
    pub kubeconfig: Option<String>,
    /// Bearer token (token auth).
    pub token: Option<String>,
    /// PEM CA bundle for token auth; materialized to disk only while a
    /// client built from it lives in the pool.
    pub ca_cert: Option<String>,
    pub active: bool,
}
