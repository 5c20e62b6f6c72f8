use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;
use tokio_postgres::Row;

use crate::auth;
use crate::models::{
    AlertEvent, AlertRule, AlertRuleCreate, AuditLogEntry, Cluster, ClusterCreate, ClusterUpdate,
    JobHistoryEntry, JobTemplate, JobTemplateCreate, User,
};

/// Initialize the schema, creating tables if they don't exist.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            endpoint TEXT NOT NULL,
            auth_type TEXT NOT NULL,
            kubeconfig_content TEXT,
            token TEXT,
            ca_cert TEXT,
            is_active BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'user',
            tenant_id BIGINT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token TEXT NOT NULL UNIQUE,
            expires_at TIMESTAMPTZ NOT NULL,
            is_revoked BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_sessions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            session_id TEXT NOT NULL UNIQUE,
            ip_address TEXT,
            user_agent TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_cluster_permissions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            cluster_id BIGINT NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            level TEXT NOT NULL DEFAULT 'read',
            UNIQUE (user_id, cluster_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_namespace_permissions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            cluster_id BIGINT NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            namespace TEXT NOT NULL,
            level TEXT NOT NULL DEFAULT 'read',
            UNIQUE (user_id, cluster_id, namespace)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT,
            cluster_id BIGINT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_name TEXT NOT NULL,
            details JSONB,
            ip_address TEXT,
            user_agent TEXT,
            success BOOLEAN NOT NULL DEFAULT TRUE,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs (created_at)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS alert_rules (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            cluster_id BIGINT,
            namespace TEXT,
            threshold DOUBLE PRECISION NOT NULL DEFAULT 0,
            severity TEXT NOT NULL DEFAULT 'warning',
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS alert_events (
            id BIGSERIAL PRIMARY KEY,
            rule_id BIGINT,
            cluster_id BIGINT,
            target TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'warning',
            status TEXT NOT NULL DEFAULT 'firing',
            message TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS alert_status (
            id BIGSERIAL PRIMARY KEY,
            rule_id BIGINT NOT NULL,
            target TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (rule_id, target)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS job_templates (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            yaml_content TEXT NOT NULL,
            is_public BOOLEAN NOT NULL DEFAULT TRUE,
            created_by BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS job_history (
            id BIGSERIAL PRIMARY KEY,
            cluster_id BIGINT NOT NULL,
            namespace TEXT NOT NULL,
            job_name TEXT NOT NULL,
            template_id BIGINT,
            status TEXT NOT NULL DEFAULT 'Pending',
            created_by BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ];

    for statement in statements {
        client
            .execute(statement, &[])
            .await
            .with_context(|| format!("failed to run schema statement: {}", &statement[..60]))?;
    }

    tracing::info!("database schema initialized");
    Ok(())
}

/// Create the default admin account when the user table is empty.
pub async fn seed_default_admin(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_one("SELECT COUNT(*)::BIGINT AS n FROM users", &[])
        .await?;
    let count: i64 = row.get("n");
    if count > 0 {
        return Ok(());
    }
    let hashed = auth::hash_password("admin");
    client
        .execute(
            "INSERT INTO users (username, hashed_password, role) VALUES ($1, $2, 'admin')",
            &[&"admin", &hashed],
        )
        .await
        .context("failed to seed default admin")?;
    tracing::warn!("seeded default admin account; change its password immediately");
    Ok(())
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

fn row_to_cluster(row: &Row) -> Cluster {
    Cluster {
        id: row.get("id"),
        name: row.get("name"),
        endpoint: row.get("endpoint"),
        auth_type: row.get("auth_type"),
        kubeconfig_content: row.get("kubeconfig_content"),
        token: row.get("token"),
        ca_cert: row.get("ca_cert"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    }
}

const CLUSTER_COLUMNS: &str =
    "id, name, endpoint, auth_type, kubeconfig_content, token, ca_cert, is_active, created_at";

/// List clusters, optionally restricted to an explicit id set (viewers).
pub async fn list_clusters(pool: &Pool, allowed: Option<&[i64]>) -> Result<Vec<Cluster>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = match allowed {
        Some(ids) => {
            client
                .query(
                    &format!(
                        "SELECT {} FROM clusters WHERE id = ANY($1) ORDER BY id",
                        CLUSTER_COLUMNS
                    ),
                    &[&ids.to_vec()],
                )
                .await
        }
        None => {
            client
                .query(
                    &format!("SELECT {} FROM clusters ORDER BY id", CLUSTER_COLUMNS),
                    &[],
                )
                .await
        }
    }
    .context("failed to list clusters")?;
    Ok(rows.iter().map(row_to_cluster).collect())
}

pub async fn get_cluster(pool: &Pool, id: i64) -> Result<Option<Cluster>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!("SELECT {} FROM clusters WHERE id = $1", CLUSTER_COLUMNS),
            &[&id],
        )
        .await
        .context("failed to query cluster")?;
    Ok(row.as_ref().map(row_to_cluster))
}

/// The single cluster flagged active, used for ambiguous list operations.
pub async fn get_active_cluster(pool: &Pool) -> Result<Option<Cluster>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!(
                "SELECT {} FROM clusters WHERE is_active ORDER BY id LIMIT 1",
                CLUSTER_COLUMNS
            ),
            &[],
        )
        .await
        .context("failed to query active cluster")?;
    Ok(row.as_ref().map(row_to_cluster))
}

pub async fn cluster_name_exists(pool: &Pool, name: &str, exclude: Option<i64>) -> Result<bool> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_one(
            "SELECT COUNT(*)::BIGINT AS n FROM clusters WHERE name = $1 AND id <> $2",
            &[&name, &exclude.unwrap_or(-1)],
        )
        .await
        .context("failed to check cluster name")?;
    let count: i64 = row.get("n");
    Ok(count > 0)
}

/// Insert a cluster. When created active, every other cluster is
/// deactivated in the same transaction so exactly one stays active.
pub async fn insert_cluster(pool: &Pool, req: &ClusterCreate) -> Result<Cluster> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client.transaction().await?;
    let row = tx
        .query_one(
            &format!(
                r#"
                INSERT INTO clusters (name, endpoint, auth_type, kubeconfig_content, token, ca_cert, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {}
                "#,
                CLUSTER_COLUMNS
            ),
            &[
                &req.name,
                &req.endpoint,
                &req.auth_type,
                &req.kubeconfig_content,
                &req.token,
                &req.ca_cert,
                &req.is_active,
            ],
        )
        .await
        .context("failed to insert cluster")?;
    let cluster = row_to_cluster(&row);
    if cluster.is_active {
        tx.execute(
            "UPDATE clusters SET is_active = FALSE WHERE id <> $1",
            &[&cluster.id],
        )
        .await
        .context("failed to deactivate other clusters")?;
    }
    tx.commit().await?;
    Ok(cluster)
}

/// Update only the provided fields; activating here also deactivates the
/// other clusters in the same transaction.
pub async fn update_cluster(pool: &Pool, id: i64, req: &ClusterUpdate) -> Result<Option<Cluster>> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client.transaction().await?;

    let mut set_clauses = Vec::new();
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
    let mut param_idx = 1;

    if let Some(ref name) = req.name {
        set_clauses.push(format!("name = ${}", param_idx));
        params.push(name);
        param_idx += 1;
    }
    if let Some(ref endpoint) = req.endpoint {
        set_clauses.push(format!("endpoint = ${}", param_idx));
        params.push(endpoint);
        param_idx += 1;
    }
    if let Some(ref auth_type) = req.auth_type {
        set_clauses.push(format!("auth_type = ${}", param_idx));
        params.push(auth_type);
        param_idx += 1;
    }
    if let Some(ref kubeconfig) = req.kubeconfig_content {
        set_clauses.push(format!("kubeconfig_content = ${}", param_idx));
        params.push(kubeconfig);
        param_idx += 1;
    }
    if let Some(ref token) = req.token {
        set_clauses.push(format!("token = ${}", param_idx));
        params.push(token);
        param_idx += 1;
    }
    if let Some(ref ca_cert) = req.ca_cert {
        set_clauses.push(format!("ca_cert = ${}", param_idx));
        params.push(ca_cert);
        param_idx += 1;
    }
    if let Some(ref is_active) = req.is_active {
        set_clauses.push(format!("is_active = ${}", param_idx));
        params.push(is_active);
        param_idx += 1;
    }

    if set_clauses.is_empty() {
        drop(tx);
        return get_cluster(pool, id).await;
    }

    let query = format!(
        "UPDATE clusters SET {} WHERE id = ${} RETURNING {}",
        set_clauses.join(", "),
        param_idx,
        CLUSTER_COLUMNS
    );
    params.push(&id);

    let row = tx
        .query_opt(&query, &params)
        .await
        .context("failed to update cluster")?;
    let cluster = row.as_ref().map(row_to_cluster);

    if let Some(ref cluster) = cluster
        && cluster.is_active
        && req.is_active == Some(true)
    {
        tx.execute(
            "UPDATE clusters SET is_active = FALSE WHERE id <> $1",
            &[&cluster.id],
        )
        .await
        .context("failed to deactivate other clusters")?;
    }
    tx.commit().await?;
    Ok(cluster)
}

pub async fn activate_cluster(pool: &Pool, id: i64) -> Result<Option<Cluster>> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client.transaction().await?;
    tx.execute(
        "UPDATE clusters SET is_active = FALSE WHERE id <> $1",
        &[&id],
    )
    .await?;
    let row = tx
        .query_opt(
            &format!(
                "UPDATE clusters SET is_active = TRUE WHERE id = $1 RETURNING {}",
                CLUSTER_COLUMNS
            ),
            &[&id],
        )
        .await
        .context("failed to activate cluster")?;
    tx.commit().await?;
    Ok(row.as_ref().map(row_to_cluster))
}

pub async fn delete_cluster(pool: &Pool, id: i64) -> Result<bool> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .execute("DELETE FROM clusters WHERE id = $1", &[&id])
        .await
        .context("failed to delete cluster")?;
    Ok(rows > 0)
}

// ---------------------------------------------------------------------------
// Users and grants
// ---------------------------------------------------------------------------

fn row_to_user(row: &Row) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        hashed_password: row.get("hashed_password"),
        email: row.get("email"),
        role: row.get("role"),
        tenant_id: row.get("tenant_id"),
        is_active: row.get("is_active"),
    }
}

const USER_COLUMNS: &str = "id, username, hashed_password, email, role, tenant_id, is_active";

pub async fn get_user_by_username(pool: &Pool, username: &str) -> Result<Option<User>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!(
                "SELECT {} FROM users WHERE username = $1 AND is_active",
                USER_COLUMNS
            ),
            &[&username],
        )
        .await
        .context("failed to query user")?;
    Ok(row.as_ref().map(row_to_user))
}

pub async fn get_user_by_id(pool: &Pool, id: i64) -> Result<Option<User>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!(
                "SELECT {} FROM users WHERE id = $1 AND is_active",
                USER_COLUMNS
            ),
            &[&id],
        )
        .await
        .context("failed to query user")?;
    Ok(row.as_ref().map(row_to_user))
}

/// Explicit (cluster_id, level) grants for a user.
pub async fn cluster_grants(pool: &Pool, user_id: i64) -> Result<Vec<(i64, String)>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            "SELECT cluster_id, level FROM user_cluster_permissions WHERE user_id = $1",
            &[&user_id],
        )
        .await
        .context("failed to query cluster grants")?;
    Ok(rows
        .iter()
        .map(|r| (r.get("cluster_id"), r.get("level")))
        .collect())
}

/// Explicit (cluster_id, namespace, level) grants for a user.
pub async fn namespace_grants(pool: &Pool, user_id: i64) -> Result<Vec<(i64, String, String)>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            "SELECT cluster_id, namespace, level FROM user_namespace_permissions WHERE user_id = $1",
            &[&user_id],
        )
        .await
        .context("failed to query namespace grants")?;
    Ok(rows
        .iter()
        .map(|r| (r.get("cluster_id"), r.get("namespace"), r.get("level")))
        .collect())
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub async fn insert_audit_log(
    pool: &Pool,
    user_id: Option<i64>,
    cluster_id: Option<i64>,
    action: &str,
    resource_type: &str,
    resource_name: &str,
    details: Option<&Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    success: bool,
    error_message: Option<&str>,
) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    client
        .execute(
            r#"
            INSERT INTO audit_logs
                (user_id, cluster_id, action, resource_type, resource_name,
                 details, ip_address, user_agent, success, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            &[
                &user_id,
                &cluster_id,
                &action,
                &resource_type,
                &resource_name,
                &details,
                &ip_address,
                &user_agent,
                &success,
                &error_message,
            ],
        )
        .await
        .context("failed to insert audit log")?;
    Ok(())
}

/// Delete one id-ordered batch of audit rows older than the cutoff.
/// Returns the number deleted; callers loop until it comes back zero.
pub async fn purge_audit_logs_batch(
    pool: &Pool,
    cutoff: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64> {
    let client = pool.get().await.context("failed to get db connection")?;
    let deleted = client
        .execute(
            r#"
            DELETE FROM audit_logs WHERE id IN (
                SELECT id FROM audit_logs
                WHERE created_at < $1
                ORDER BY id ASC
                LIMIT $2
            )
            "#,
            &[&cutoff, &batch_size],
        )
        .await
        .context("failed to purge audit logs")?;
    Ok(deleted)
}

pub async fn list_audit_logs(pool: &Pool, limit: i64) -> Result<Vec<AuditLogEntry>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            r#"
            SELECT id, user_id, cluster_id, action, resource_type, resource_name,
                   details, ip_address, user_agent, success, error_message, created_at
            FROM audit_logs
            ORDER BY id DESC
            LIMIT $1
            "#,
            &[&limit],
        )
        .await
        .context("failed to list audit logs")?;
    Ok(rows
        .iter()
        .map(|r| AuditLogEntry {
            id: r.get("id"),
            user_id: r.get("user_id"),
            cluster_id: r.get("cluster_id"),
            action: r.get("action"),
            resource_type: r.get("resource_type"),
            resource_name: r.get("resource_name"),
            details: r.get("details"),
            ip_address: r.get("ip_address"),
            user_agent: r.get("user_agent"),
            success: r.get("success"),
            error_message: r.get("error_message"),
            created_at: r.get("created_at"),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

fn row_to_alert_rule(row: &Row) -> AlertRule {
    AlertRule {
        id: row.get("id"),
        name: row.get("name"),
        rule_type: row.get("rule_type"),
        cluster_id: row.get("cluster_id"),
        namespace: row.get("namespace"),
        threshold: row.get("threshold"),
        severity: row.get("severity"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
    }
}

const ALERT_RULE_COLUMNS: &str =
    "id, name, rule_type, cluster_id, namespace, threshold, severity, enabled, created_at";

pub async fn list_alert_rules(pool: &Pool, enabled_only: bool) -> Result<Vec<AlertRule>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let query = if enabled_only {
        format!(
            "SELECT {} FROM alert_rules WHERE enabled ORDER BY id",
            ALERT_RULE_COLUMNS
        )
    } else {
        format!("SELECT {} FROM alert_rules ORDER BY id", ALERT_RULE_COLUMNS)
    };
    let rows = client
        .query(&query, &[])
        .await
        .context("failed to list alert rules")?;
    Ok(rows.iter().map(row_to_alert_rule).collect())
}

pub async fn insert_alert_rule(pool: &Pool, req: &AlertRuleCreate) -> Result<AlertRule> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_one(
            &format!(
                r#"
                INSERT INTO alert_rules (name, rule_type, cluster_id, namespace, threshold, severity, enabled)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {}
                "#,
                ALERT_RULE_COLUMNS
            ),
            &[
                &req.name,
                &req.rule_type,
                &req.cluster_id,
                &req.namespace,
                &req.threshold,
                &req.severity,
                &req.enabled,
            ],
        )
        .await
        .context("failed to insert alert rule")?;
    Ok(row_to_alert_rule(&row))
}

pub async fn delete_alert_rule(pool: &Pool, id: i64) -> Result<bool> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .execute("DELETE FROM alert_rules WHERE id = $1", &[&id])
        .await
        .context("failed to delete alert rule")?;
    Ok(rows > 0)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_alert_event(
    pool: &Pool,
    rule_id: Option<i64>,
    cluster_id: Option<i64>,
    target: &str,
    severity: &str,
    status: &str,
    message: &str,
) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    client
        .execute(
            r#"
            INSERT INTO alert_events (rule_id, cluster_id, target, severity, status, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[&rule_id, &cluster_id, &target, &severity, &status, &message],
        )
        .await
        .context("failed to insert alert event")?;
    Ok(())
}

pub async fn list_alert_events(pool: &Pool, limit: i64) -> Result<Vec<AlertEvent>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            r#"
            SELECT id, rule_id, cluster_id, target, severity, status, message, created_at
            FROM alert_events
            ORDER BY id DESC
            LIMIT $1
            "#,
            &[&limit],
        )
        .await
        .context("failed to list alert events")?;
    Ok(rows
        .iter()
        .map(|r| AlertEvent {
            id: r.get("id"),
            rule_id: r.get("rule_id"),
            cluster_id: r.get("cluster_id"),
            target: r.get("target"),
            severity: r.get("severity"),
            status: r.get("status"),
            message: r.get("message"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Current firing state for (rule, target); used to de-duplicate alerts
/// across evaluator rounds.
pub async fn alert_is_firing(pool: &Pool, rule_id: i64, target: &str) -> Result<bool> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            "SELECT status FROM alert_status WHERE rule_id = $1 AND target = $2",
            &[&rule_id, &target],
        )
        .await
        .context("failed to query alert status")?;
    Ok(row
        .map(|r| r.get::<_, String>("status") == "firing")
        .unwrap_or(false))
}

/// Targets currently firing for a rule; the evaluator resolves the ones
/// whose condition has cleared.
pub async fn list_firing_targets(pool: &Pool, rule_id: i64) -> Result<Vec<String>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            "SELECT target FROM alert_status WHERE rule_id = $1 AND status = 'firing'",
            &[&rule_id],
        )
        .await
        .context("failed to list firing targets")?;
    Ok(rows.iter().map(|r| r.get("target")).collect())
}

pub async fn set_alert_status(pool: &Pool, rule_id: i64, target: &str, status: &str) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    client
        .execute(
            r#"
            INSERT INTO alert_status (rule_id, target, status, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (rule_id, target) DO UPDATE
            SET status = EXCLUDED.status, updated_at = now()
            "#,
            &[&rule_id, &target, &status],
        )
        .await
        .context("failed to set alert status")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Job templates and history
// ---------------------------------------------------------------------------

fn row_to_job_template(row: &Row) -> JobTemplate {
    JobTemplate {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        yaml_content: row.get("yaml_content"),
        is_public: row.get("is_public"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

const JOB_TEMPLATE_COLUMNS: &str =
    "id, name, description, category, yaml_content, is_public, created_by, created_at";

pub async fn insert_job_template(
    pool: &Pool,
    req: &JobTemplateCreate,
    created_by: i64,
) -> Result<JobTemplate> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_one(
            &format!(
                r#"
                INSERT INTO job_templates (name, description, category, yaml_content, is_public, created_by)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {}
                "#,
                JOB_TEMPLATE_COLUMNS
            ),
            &[
                &req.name,
                &req.description,
                &req.category,
                &req.yaml_content,
                &req.is_public,
                &created_by,
            ],
        )
        .await
        .context("failed to insert job template")?;
    Ok(row_to_job_template(&row))
}

pub async fn list_job_templates(pool: &Pool, user_id: i64) -> Result<Vec<JobTemplate>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            &format!(
                "SELECT {} FROM job_templates WHERE is_public OR created_by = $1 ORDER BY id",
                JOB_TEMPLATE_COLUMNS
            ),
            &[&user_id],
        )
        .await
        .context("failed to list job templates")?;
    Ok(rows.iter().map(row_to_job_template).collect())
}

pub async fn get_job_template(pool: &Pool, id: i64) -> Result<Option<JobTemplate>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!("SELECT {} FROM job_templates WHERE id = $1", JOB_TEMPLATE_COLUMNS),
            &[&id],
        )
        .await
        .context("failed to query job template")?;
    Ok(row.as_ref().map(row_to_job_template))
}

pub async fn delete_job_template(pool: &Pool, id: i64) -> Result<bool> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .execute("DELETE FROM job_templates WHERE id = $1", &[&id])
        .await
        .context("failed to delete job template")?;
    Ok(rows > 0)
}

pub async fn insert_job_history(
    pool: &Pool,
    cluster_id: i64,
    namespace: &str,
    job_name: &str,
    template_id: Option<i64>,
    status: &str,
    created_by: i64,
) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    client
        .execute(
            r#"
            INSERT INTO job_history (cluster_id, namespace, job_name, template_id, status, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &cluster_id,
                &namespace,
                &job_name,
                &template_id,
                &status,
                &created_by,
            ],
        )
        .await
        .context("failed to insert job history")?;
    Ok(())
}

pub async fn list_job_history(pool: &Pool, limit: i64) -> Result<Vec<JobHistoryEntry>> {
    let client = pool.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            r#"
            SELECT id, cluster_id, namespace, job_name, template_id, status, created_by, created_at
            FROM job_history
            ORDER BY id DESC
            LIMIT $1
            "#,
            &[&limit],
        )
        .await
        .context("failed to list job history")?;
    Ok(rows
        .iter()
        .map(|r| JobHistoryEntry {
            id: r.get("id"),
            cluster_id: r.get("cluster_id"),
            namespace: r.get("namespace"),
            job_name: r.get("job_name"),
            template_id: r.get("template_id"),
            status: r.get("status"),
            created_by: r.get("created_by"),
            created_at: r.get("created_at"),
        })
        .collect())
}
