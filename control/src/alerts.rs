use std::collections::{HashMap, HashSet};

use armada_fabric::read::{self, ListOptions};
use armada_fabric::{Cache, ClientPool, ResourceKind};
use deadpool_postgres::Pool;
use serde::Deserialize;
use serde_json::Value;

use crate::db;
use crate::models::AlertRule;

/// Alertmanager-compatible webhook payload.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub alerts: Vec<WebhookAlert>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookAlert {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl WebhookAlert {
    pub fn target(&self) -> String {
        self.fingerprint
            .clone()
            .or_else(|| self.labels.get("alertname").cloned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn message(&self) -> String {
        self.annotations
            .get("summary")
            .or_else(|| self.annotations.get("description"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn severity(&self) -> String {
        self.labels
            .get("severity")
            .cloned()
            .unwrap_or_else(|| "warning".to_string())
    }
}

/// One evaluation pass over every enabled rule. Failures are logged per
/// rule; a broken rule never stops the others.
pub async fn check_all_rules(db: &Pool, pool: &ClientPool, cache: &Cache) {
    let rules = match db::list_alert_rules(db, true).await {
        Ok(rules) => rules,
        Err(e) => {
            tracing::error!(error = %e, "failed to load alert rules");
            return;
        }
    };
    let clusters = match db::list_clusters(db, None).await {
        Ok(clusters) => clusters,
        Err(e) => {
            tracing::error!(error = %e, "failed to load clusters for alerting");
            return;
        }
    };

    for rule in rules {
        let targets: Vec<_> = clusters
            .iter()
            .filter(|c| c.is_active)
            .filter(|c| rule.cluster_id.is_none_or(|id| id == c.id))
            .collect();
        for cluster in targets {
            if let Err(e) = check_rule(db, pool, cache, &rule, &cluster.to_config()).await {
                tracing::warn!(rule = %rule.name, cluster_id = cluster.id, error = %e, "alert rule check failed");
            }
        }
    }
}

async fn check_rule(
    db: &Pool,
    pool: &ClientPool,
    cache: &Cache,
    rule: &AlertRule,
    cluster: &armada_fabric::ClusterConfig,
) -> anyhow::Result<()> {
    let firing: HashSet<String> = match rule.rule_type.as_str() {
        "pod_restart" => pod_restart_targets(pool, rule, cluster).await?,
        "node_unavailable" => node_unavailable_targets(pool, cache, rule, cluster).await?,
        other => {
            tracing::debug!(rule_type = other, "unknown alert rule type, skipping");
            return Ok(());
        }
    };

    let previously_firing: HashSet<String> = db::list_firing_targets(db, rule.id)
        .await?
        .into_iter()
        .filter(|t| t.starts_with(&format!("cluster/{}/", cluster.id)))
        .collect();

    for target in firing.difference(&previously_firing) {
        let message = format!("{} triggered for {}", rule.name, target);
        db::insert_alert_event(
            db,
            Some(rule.id),
            Some(cluster.id),
            target,
            &rule.severity,
            "firing",
            &message,
        )
        .await?;
        db::set_alert_status(db, rule.id, target, "firing").await?;
        tracing::warn!(rule = %rule.name, target = %target, "alert firing");
    }

    for target in previously_firing.difference(&firing) {
        let message = format!("{} resolved for {}", rule.name, target);
        db::insert_alert_event(
            db,
            Some(rule.id),
            Some(cluster.id),
            target,
            &rule.severity,
            "resolved",
            &message,
        )
        .await?;
        db::set_alert_status(db, rule.id, target, "resolved").await?;
        tracing::info!(rule = %rule.name, target = %target, "alert resolved");
    }

    Ok(())
}

async fn pod_restart_targets(
    pool: &ClientPool,
    rule: &AlertRule,
    cluster: &armada_fabric::ClusterConfig,
) -> anyhow::Result<HashSet<String>> {
    let opts = ListOptions {
        limit: 1000,
        ..Default::default()
    };
    let page = read::list_page(
        pool,
        cluster,
        ResourceKind::Pod,
        rule.namespace.as_deref(),
        &opts,
    )
    .await?;
    Ok(page
        .items
        .iter()
        .filter(|pod| {
            pod.get("restarts").and_then(Value::as_i64).unwrap_or(0) as f64 >= rule.threshold
        })
        .filter_map(|pod| {
            let name = pod.get("name")?.as_str()?;
            let ns = pod.get("namespace")?.as_str()?;
            Some(format!("cluster/{}/pod/{}/{}", cluster.id, ns, name))
        })
        .collect())
}

async fn node_unavailable_targets(
    pool: &ClientPool,
    cache: &Cache,
    _rule: &AlertRule,
    cluster: &armada_fabric::ClusterConfig,
) -> anyhow::Result<HashSet<String>> {
    let nodes = read::nodes_info(pool, cache, cluster).await?;
    Ok(nodes
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter(|node| node.get("status").and_then(Value::as_str) == Some("NotReady"))
                .filter_map(|node| node.get("name").and_then(Value::as_str))
                .map(|name| format!("cluster/{}/node/{}", cluster.id, name))
                .collect()
        })
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webhook_alert_falls_back_through_identity_fields() {
        let alert: WebhookAlert = serde_json::from_value(json!({
            "labels": {"alertname": "HighCPU", "severity": "critical"},
            "annotations": {"summary": "CPU above 90%"},
        }))
        .unwrap();
        assert_eq!(alert.target(), "HighCPU");
        assert_eq!(alert.message(), "CPU above 90%");
        assert_eq!(alert.severity(), "critical");

        let bare: WebhookAlert = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare.target(), "unknown");
        assert_eq!(bare.severity(), "warning");
    }

    #[test]
    fn fingerprint_wins_over_alertname() {
        let alert: WebhookAlert = serde_json::from_value(json!({
            "fingerprint": "abc123",
            "labels": {"alertname": "HighCPU"},
        }))
        .unwrap();
        assert_eq!(alert.target(), "abc123");
    }
}
