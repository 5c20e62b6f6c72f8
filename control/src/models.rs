use armada_fabric::{AuthMode, ClusterConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A managed cluster as stored in the registry. Credentials never serialize
/// out through the API surface.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub auth_type: String,
    pub kubeconfig_content: Option<String>,
    pub token: Option<String>,
    pub ca_cert: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn to_config(&self) -> ClusterConfig {
        ClusterConfig {
            id: self.id,
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            auth_mode: AuthMode::parse(&self.auth_type).unwrap_or(AuthMode::Kubeconfig),
            kubeconfig: self.kubeconfig_content.clone(),
            token: self.token.clone(),
            ca_cert: self.ca_cert.clone(),
            active: self.is_active,
        }
    }

    pub fn to_response(&self) -> ClusterResponse {
        ClusterResponse {
            id: self.id,
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            auth_type: self.auth_type.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterResponse {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub auth_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterCreate {
    pub name: String,
    pub endpoint: String,
    pub auth_type: String,
    #[serde(default)]
    pub kubeconfig_content: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterUpdate {
    pub name: Option<String>,
    pub endpoint: Option<String>,
    pub auth_type: Option<String>,
    pub kubeconfig_content: Option<String>,
    pub token: Option<String>,
    pub ca_cert: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub email: Option<String>,
    pub role: String,
    pub tenant_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct NamespaceCreate {
    pub name: String,
    #[serde(default)]
    pub labels: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: i32,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub container: String,
    pub image: String,
}

/// YAML payload for create / replace endpoints.
#[derive(Debug, Deserialize)]
pub struct YamlBody {
    pub yaml: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchPodRequest {
    #[serde(default)]
    pub cluster_id: Option<i64>,
    pub pods: Vec<PodRef>,
    #[serde(default)]
    pub force: bool,
}

/// Common query parameters of the resource read/mutation families.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResourceQuery {
    pub cluster_id: Option<i64>,
    pub namespace: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    #[serde(default)]
    pub force: bool,
    pub container: Option<String>,
    pub tail_lines: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub rule_type: String,
    pub cluster_id: Option<i64>,
    pub namespace: Option<String>,
    pub threshold: f64,
    pub severity: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AlertRuleCreate {
    pub name: String,
    pub rule_type: String,
    #[serde(default)]
    pub cluster_id: Option<i64>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub threshold: f64,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub target: String,
    pub severity: String,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobTemplate {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub yaml_content: String,
    pub is_public: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct JobTemplateCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub yaml_content: String,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobLaunchRequest {
    #[serde(default)]
    pub cluster_id: Option<i64>,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHistoryEntry {
    pub id: i64,
    pub cluster_id: i64,
    pub namespace: String,
    pub job_name: String,
    pub template_id: Option<i64>,
    pub status: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_name: String,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
