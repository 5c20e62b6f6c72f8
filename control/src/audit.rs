use armada_common::RequestContext;
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;

use crate::db;

/// Append-only audit trail. A sink failure is logged and swallowed; it must
/// never fail the operation being audited.
#[derive(Clone)]
pub struct AuditSink {
    db: Pool,
}

pub struct AuditRecord<'a> {
    pub user_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
    pub details: Value,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditSink {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    pub async fn record(&self, ctx: Option<&RequestContext>, entry: AuditRecord<'_>) {
        let ip = ctx
            .and_then(|c| c.client_ip.as_ref())
            .map(|ip| ip.to_string());
        let user_agent = ctx.and_then(|c| c.user_agent.clone());
        let result = db::insert_audit_log(
            &self.db,
            entry.user_id,
            entry.cluster_id,
            entry.action,
            entry.resource_type,
            entry.resource_name,
            Some(&entry.details),
            ip.as_deref(),
            user_agent.as_deref(),
            entry.success,
            entry.error.as_deref(),
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(
                action = entry.action,
                resource = entry.resource_name,
                error = %e,
                "audit write failed"
            );
        }
    }

    /// Delete everything older than the retention window, in id-ordered
    /// batches so no single transaction grows unbounded. Returns the total
    /// number of rows removed.
    pub async fn purge_older_than(&self, retention_days: i64, batch_size: i64) -> u64 {
        let cutoff = Utc::now() - Duration::days(retention_days.max(1));
        let mut total = 0u64;
        loop {
            match db::purge_audit_logs_batch(&self.db, cutoff, batch_size).await {
                Ok(0) => break,
                Ok(deleted) => {
                    total += deleted;
                    if (deleted as i64) < batch_size {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "audit retention batch failed");
                    break;
                }
            }
        }
        if total > 0 {
            tracing::info!(deleted = total, cutoff = %cutoff, "audit retention pass done");
        }
        total
    }
}
