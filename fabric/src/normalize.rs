use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::kinds::ResourceKind;

/// Render the greatest nonzero unit of `now - creation` as `d`/`h`/`m`/`s`.
/// Missing or unparseable timestamps render as `Unknown`.
pub fn format_age(creation: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(raw) = creation else {
        return "Unknown".to_string();
    };
    let Ok(created) = DateTime::parse_from_rfc3339(raw) else {
        return "Unknown".to_string();
    };
    let secs = (now - created.with_timezone(&Utc)).num_seconds().max(0);
    if secs >= 86_400 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3_600 {
        format!("{}h", secs / 3_600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

fn path<'a>(obj: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut cur = obj;
    for seg in segments {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn str_at<'a>(obj: &'a Value, segments: &[&str]) -> Option<&'a str> {
    path(obj, segments).and_then(Value::as_str)
}

fn i64_at(obj: &Value, segments: &[&str]) -> i64 {
    path(obj, segments).and_then(Value::as_i64).unwrap_or(0)
}

fn labels_of(obj: &Value) -> Value {
    path(obj, &["metadata", "labels"])
        .cloned()
        .unwrap_or_else(|| json!({}))
}

fn annotations_of(obj: &Value) -> Value {
    path(obj, &["metadata", "annotations"])
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// `"R/T"` over the pod's container statuses.
pub fn ready_containers(obj: &Value) -> String {
    let statuses = path(obj, &["status", "containerStatuses"])
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let total = statuses.len();
    let ready = statuses
        .iter()
        .filter(|cs| cs.get("ready").and_then(Value::as_bool).unwrap_or(false))
        .count();
    format!("{}/{}", ready, total)
}

/// Sum of restart counts over the pod's container statuses.
pub fn restart_count(obj: &Value) -> i64 {
    path(obj, &["status", "containerStatuses"])
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| cs.get("restartCount").and_then(Value::as_i64).unwrap_or(0))
                .sum()
        })
        .unwrap_or(0)
}

/// Ready / NotReady by the node's `Ready` condition, `Unknown` without one.
pub fn node_readiness(obj: &Value) -> &'static str {
    let conditions = path(obj, &["status", "conditions"]).and_then(Value::as_array);
    let Some(conditions) = conditions else {
        return "Unknown";
    };
    for condition in conditions {
        if condition.get("type").and_then(Value::as_str) == Some("Ready") {
            return if condition.get("status").and_then(Value::as_str) == Some("True") {
                "Ready"
            } else {
                "NotReady"
            };
        }
    }
    "Unknown"
}

/// First load-balancer ingress hostname, falling back to the first IP.
pub fn service_external_ip(obj: &Value) -> Option<String> {
    let ingress = path(obj, &["status", "loadBalancer", "ingress"]).and_then(Value::as_array)?;
    for entry in ingress {
        if let Some(hostname) = entry.get("hostname").and_then(Value::as_str)
            && !hostname.is_empty()
        {
            return Some(hostname.to_string());
        }
    }
    for entry in ingress {
        if let Some(ip) = entry.get("ip").and_then(Value::as_str)
            && !ip.is_empty()
        {
            return Some(ip.to_string());
        }
    }
    None
}

fn ingress_hosts(obj: &Value) -> Vec<String> {
    path(obj, &["spec", "rules"])
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.get("host").and_then(Value::as_str))
                .map(|h| h.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn ingress_addresses(obj: &Value) -> Vec<String> {
    path(obj, &["status", "loadBalancer", "ingress"])
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    e.get("hostname")
                        .and_then(Value::as_str)
                        .or_else(|| e.get("ip").and_then(Value::as_str))
                })
                .map(|a| a.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn node_roles(obj: &Value) -> Vec<String> {
    path(obj, &["metadata", "labels"])
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .map(|r| r.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn node_address(obj: &Value, addr_type: &str) -> Option<String> {
    path(obj, &["status", "addresses"])
        .and_then(Value::as_array)?
        .iter()
        .find(|a| a.get("type").and_then(Value::as_str) == Some(addr_type))
        .and_then(|a| a.get("address").and_then(Value::as_str))
        .map(|a| a.to_string())
}

fn job_status(obj: &Value) -> String {
    let conditions = path(obj, &["status", "conditions"]).and_then(Value::as_array);
    let Some(conditions) = conditions.filter(|c| !c.is_empty()) else {
        return "Pending".to_string();
    };
    conditions
        .iter()
        .max_by_key(|c| {
            c.get("lastTransitionTime")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        })
        .and_then(|c| c.get("type").and_then(Value::as_str))
        .unwrap_or("Pending")
        .to_string()
}

fn key_count(obj: &Value, segments: &[&str]) -> usize {
    path(obj, segments)
        .and_then(Value::as_object)
        .map(|m| m.len())
        .unwrap_or(0)
}

fn array_len(obj: &Value, segments: &[&str]) -> usize {
    path(obj, segments)
        .and_then(Value::as_array)
        .map(|a| a.len())
        .unwrap_or(0)
}

/// Normalized list-item snapshot of one upstream object. The watcher and the
/// read facade both go through here so live pushes can never drift from the
/// HTTP view.
pub fn summarize(kind: ResourceKind, obj: &Value, now: DateTime<Utc>) -> Value {
    let mut out = Map::new();
    out.insert(
        "name".into(),
        json!(str_at(obj, &["metadata", "name"]).unwrap_or_default()),
    );
    if let Some(ns) = str_at(obj, &["metadata", "namespace"]) {
        out.insert("namespace".into(), json!(ns));
    }
    out.insert(
        "age".into(),
        json!(format_age(
            str_at(obj, &["metadata", "creationTimestamp"]),
            now
        )),
    );
    out.insert("labels".into(), labels_of(obj));

    match kind {
        ResourceKind::Pod => {
            out.insert(
                "status".into(),
                json!(str_at(obj, &["status", "phase"]).unwrap_or("Unknown")),
            );
            out.insert(
                "node_name".into(),
                json!(str_at(obj, &["spec", "nodeName"])),
            );
            out.insert("restarts".into(), json!(restart_count(obj)));
            out.insert("ready_containers".into(), json!(ready_containers(obj)));
        }
        ResourceKind::Deployment => {
            out.insert("replicas".into(), json!(i64_at(obj, &["spec", "replicas"])));
            out.insert(
                "ready_replicas".into(),
                json!(i64_at(obj, &["status", "readyReplicas"])),
            );
            out.insert(
                "available_replicas".into(),
                json!(i64_at(obj, &["status", "availableReplicas"])),
            );
            out.insert(
                "unavailable_replicas".into(),
                json!(i64_at(obj, &["status", "unavailableReplicas"])),
            );
        }
        ResourceKind::StatefulSet => {
            out.insert("replicas".into(), json!(i64_at(obj, &["spec", "replicas"])));
            out.insert(
                "ready_replicas".into(),
                json!(i64_at(obj, &["status", "readyReplicas"])),
            );
        }
        ResourceKind::DaemonSet => {
            out.insert(
                "desired".into(),
                json!(i64_at(obj, &["status", "desiredNumberScheduled"])),
            );
            out.insert("ready".into(), json!(i64_at(obj, &["status", "numberReady"])));
        }
        ResourceKind::CronJob => {
            out.insert("schedule".into(), json!(str_at(obj, &["spec", "schedule"])));
            out.insert(
                "suspend".into(),
                json!(
                    path(obj, &["spec", "suspend"])
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                ),
            );
            out.insert(
                "last_schedule_time".into(),
                json!(str_at(obj, &["status", "lastScheduleTime"])),
            );
        }
        ResourceKind::Job => {
            out.insert(
                "completions".into(),
                json!(i64_at(obj, &["spec", "completions"])),
            );
            out.insert("succeeded".into(), json!(i64_at(obj, &["status", "succeeded"])));
            out.insert("failed".into(), json!(i64_at(obj, &["status", "failed"])));
            out.insert("active".into(), json!(i64_at(obj, &["status", "active"])));
            out.insert("status".into(), json!(job_status(obj)));
        }
        ResourceKind::Service => {
            out.insert("type".into(), json!(str_at(obj, &["spec", "type"])));
            out.insert("cluster_ip".into(), json!(str_at(obj, &["spec", "clusterIP"])));
            out.insert("external_ip".into(), json!(service_external_ip(obj)));
            out.insert(
                "ports".into(),
                path(obj, &["spec", "ports"])
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            );
            out.insert(
                "selector".into(),
                path(obj, &["spec", "selector"])
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            );
        }
        ResourceKind::ConfigMap => {
            out.insert("data_keys".into(), json!(key_count(obj, &["data"])));
        }
        ResourceKind::Secret => {
            out.insert("type".into(), json!(str_at(obj, &["type"])));
            out.insert("data_keys".into(), json!(key_count(obj, &["data"])));
        }
        ResourceKind::Ingress => {
            out.insert("hosts".into(), json!(ingress_hosts(obj)));
            out.insert("addresses".into(), json!(ingress_addresses(obj)));
            out.insert(
                "ingress_class".into(),
                json!(str_at(obj, &["spec", "ingressClassName"])),
            );
        }
        ResourceKind::NetworkPolicy => {
            out.insert(
                "pod_selector".into(),
                path(obj, &["spec", "podSelector"])
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            );
        }
        ResourceKind::PersistentVolume => {
            out.insert(
                "status".into(),
                json!(str_at(obj, &["status", "phase"]).unwrap_or("Unknown")),
            );
            out.insert(
                "capacity".into(),
                json!(str_at(obj, &["spec", "capacity", "storage"])),
            );
            out.insert(
                "claim".into(),
                json!(str_at(obj, &["spec", "claimRef", "name"])),
            );
            out.insert(
                "storage_class".into(),
                json!(str_at(obj, &["spec", "storageClassName"])),
            );
            out.insert(
                "access_modes".into(),
                path(obj, &["spec", "accessModes"])
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            );
        }
        ResourceKind::PersistentVolumeClaim => {
            out.insert(
                "status".into(),
                json!(str_at(obj, &["status", "phase"]).unwrap_or("Unknown")),
            );
            out.insert("volume".into(), json!(str_at(obj, &["spec", "volumeName"])));
            out.insert(
                "capacity".into(),
                json!(str_at(obj, &["status", "capacity", "storage"])),
            );
            out.insert(
                "storage_class".into(),
                json!(str_at(obj, &["spec", "storageClassName"])),
            );
            out.insert(
                "access_modes".into(),
                path(obj, &["spec", "accessModes"])
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            );
        }
        ResourceKind::StorageClass => {
            out.insert("provisioner".into(), json!(str_at(obj, &["provisioner"])));
            out.insert("reclaim_policy".into(), json!(str_at(obj, &["reclaimPolicy"])));
            out.insert(
                "volume_binding_mode".into(),
                json!(str_at(obj, &["volumeBindingMode"])),
            );
        }
        ResourceKind::ResourceQuota => {
            out.insert(
                "hard".into(),
                path(obj, &["spec", "hard"])
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            );
            out.insert(
                "used".into(),
                path(obj, &["status", "used"])
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            );
        }
        ResourceKind::LimitRange => {
            out.insert("limits".into(), json!(array_len(obj, &["spec", "limits"])));
        }
        ResourceKind::Role | ResourceKind::ClusterRole => {
            out.insert("rules".into(), json!(array_len(obj, &["rules"])));
        }
        ResourceKind::RoleBinding | ResourceKind::ClusterRoleBinding => {
            out.insert(
                "role_ref".into(),
                json!(str_at(obj, &["roleRef", "name"])),
            );
            out.insert("subjects".into(), json!(array_len(obj, &["subjects"])));
        }
        ResourceKind::ServiceAccount => {
            out.insert("secrets".into(), json!(array_len(obj, &["secrets"])));
        }
        ResourceKind::HorizontalPodAutoscaler => {
            out.insert(
                "reference".into(),
                json!(str_at(obj, &["spec", "scaleTargetRef", "name"])),
            );
            out.insert(
                "min_replicas".into(),
                json!(i64_at(obj, &["spec", "minReplicas"])),
            );
            out.insert(
                "max_replicas".into(),
                json!(i64_at(obj, &["spec", "maxReplicas"])),
            );
            out.insert(
                "current_replicas".into(),
                json!(i64_at(obj, &["status", "currentReplicas"])),
            );
        }
        ResourceKind::PodDisruptionBudget => {
            out.insert(
                "min_available".into(),
                path(obj, &["spec", "minAvailable"])
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            out.insert(
                "max_unavailable".into(),
                path(obj, &["spec", "maxUnavailable"])
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            out.insert(
                "disruptions_allowed".into(),
                json!(i64_at(obj, &["status", "disruptionsAllowed"])),
            );
        }
        ResourceKind::Event => {
            out.insert("type".into(), json!(str_at(obj, &["type"])));
            out.insert("reason".into(), json!(str_at(obj, &["reason"])));
            out.insert("message".into(), json!(str_at(obj, &["message"])));
            out.insert(
                "source".into(),
                json!(str_at(obj, &["source", "component"])),
            );
            out.insert("count".into(), json!(i64_at(obj, &["count"])));
            out.insert(
                "first_timestamp".into(),
                json!(str_at(obj, &["firstTimestamp"])),
            );
            out.insert(
                "last_timestamp".into(),
                json!(str_at(obj, &["lastTimestamp"])),
            );
            // Event age counts from the last occurrence, not object creation.
            out.insert(
                "age".into(),
                json!(format_age(str_at(obj, &["lastTimestamp"]), now)),
            );
            out.insert(
                "involved_object".into(),
                path(obj, &["involvedObject"])
                    .map(|io| {
                        json!({
                            "kind": io.get("kind"),
                            "name": io.get("name"),
                            "namespace": io.get("namespace"),
                        })
                    })
                    .unwrap_or(Value::Null),
            );
        }
        ResourceKind::Node => {
            out.insert("status".into(), json!(node_readiness(obj)));
            out.insert("roles".into(), json!(node_roles(obj)));
            out.insert(
                "version".into(),
                json!(str_at(obj, &["status", "nodeInfo", "kubeletVersion"]).unwrap_or("Unknown")),
            );
            out.insert("internal_ip".into(), json!(node_address(obj, "InternalIP")));
            out.insert("external_ip".into(), json!(node_address(obj, "ExternalIP")));
            out.insert(
                "cpu_capacity".into(),
                json!(str_at(obj, &["status", "capacity", "cpu"]).unwrap_or("0")),
            );
            out.insert(
                "memory_capacity".into(),
                json!(str_at(obj, &["status", "capacity", "memory"]).unwrap_or("0")),
            );
            out.insert(
                "pods_capacity".into(),
                json!(str_at(obj, &["status", "capacity", "pods"]).unwrap_or("0")),
            );
        }
        ResourceKind::Namespace => {
            out.insert(
                "status".into(),
                json!(str_at(obj, &["status", "phase"]).unwrap_or("Unknown")),
            );
        }
    }

    Value::Object(out)
}

/// Strip server-side noise that has no place in a round-trippable manifest.
pub fn sanitize(obj: &Value) -> Value {
    let mut out = obj.clone();
    if let Some(meta) = out.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
    out
}

fn conditions_of(obj: &Value) -> Value {
    path(obj, &["status", "conditions"])
        .and_then(Value::as_array)
        .map(|conditions| {
            json!(
                conditions
                    .iter()
                    .map(|c| {
                        json!({
                            "type": c.get("type"),
                            "status": c.get("status"),
                            "reason": c.get("reason"),
                            "message": c.get("message"),
                            "last_transition_time": c.get("lastTransitionTime"),
                        })
                    })
                    .collect::<Vec<_>>()
            )
        })
        .unwrap_or_else(|| json!([]))
}

/// Detail snapshot: the summary plus conditions, annotations, and a
/// sanitized object blob suitable for YAML round-trip.
pub fn detail(kind: ResourceKind, obj: &Value, now: DateTime<Utc>) -> Value {
    let mut out = match summarize(kind, obj, now) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    out.insert("annotations".into(), annotations_of(obj));
    out.insert("conditions".into(), conditions_of(obj));
    out.insert("object".into(), sanitize(obj));
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs_ago: i64, now: DateTime<Utc>) -> String {
        (now - chrono::Duration::seconds(secs_ago)).to_rfc3339()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn age_picks_greatest_nonzero_unit() {
        let now = now();
        assert_eq!(format_age(Some(&at(30, now)), now), "30s");
        assert_eq!(format_age(Some(&at(61, now)), now), "1m");
        assert_eq!(format_age(Some(&at(7_200, now)), now), "2h");
        assert_eq!(format_age(Some(&at(90 * 86_400, now)), now), "90d");
        assert_eq!(format_age(None, now), "Unknown");
        assert_eq!(format_age(Some("not-a-time"), now), "Unknown");
    }

    #[test]
    fn pod_summary_counts_ready_and_restarts() {
        let pod = json!({
            "metadata": {
                "name": "web-1",
                "namespace": "default",
                "creationTimestamp": at(120, now()),
                "labels": {"app": "web"},
            },
            "spec": {"nodeName": "node-a"},
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"ready": true, "restartCount": 2},
                    {"ready": false, "restartCount": 1},
                ],
            },
        });
        let snap = summarize(ResourceKind::Pod, &pod, now());
        assert_eq!(snap["name"], "web-1");
        assert_eq!(snap["status"], "Running");
        assert_eq!(snap["ready_containers"], "1/2");
        assert_eq!(snap["restarts"], 3);
        assert_eq!(snap["age"], "2m");
        assert_eq!(snap["labels"]["app"], "web");
    }

    #[test]
    fn node_readiness_follows_ready_condition() {
        let ready = json!({"status": {"conditions": [
            {"type": "MemoryPressure", "status": "False"},
            {"type": "Ready", "status": "True"},
        ]}});
        let not_ready = json!({"status": {"conditions": [
            {"type": "Ready", "status": "False"},
        ]}});
        let unknown = json!({"status": {}});
        assert_eq!(node_readiness(&ready), "Ready");
        assert_eq!(node_readiness(&not_ready), "NotReady");
        assert_eq!(node_readiness(&unknown), "Unknown");
    }

    #[test]
    fn external_ip_prefers_hostname_over_ip() {
        let svc = json!({"status": {"loadBalancer": {"ingress": [
            {"ip": "203.0.113.7"},
            {"hostname": "lb.example.com"},
        ]}}});
        assert_eq!(service_external_ip(&svc).unwrap(), "lb.example.com");
        let svc = json!({"status": {"loadBalancer": {"ingress": [
            {"ip": "203.0.113.7"},
        ]}}});
        assert_eq!(service_external_ip(&svc).unwrap(), "203.0.113.7");
        assert_eq!(service_external_ip(&json!({})), None);
    }

    #[test]
    fn detail_sanitizes_managed_fields() {
        let dep = json!({
            "metadata": {
                "name": "api",
                "namespace": "prod",
                "creationTimestamp": at(3600, now()),
                "managedFields": [{"manager": "kubectl"}],
                "annotations": {"team": "core"},
            },
            "spec": {"replicas": 3},
            "status": {
                "readyReplicas": 3,
                "conditions": [{"type": "Available", "status": "True"}],
            },
        });
        let d = detail(ResourceKind::Deployment, &dep, now());
        assert_eq!(d["annotations"]["team"], "core");
        assert_eq!(d["conditions"][0]["type"], "Available");
        assert!(d["object"]["metadata"].get("managedFields").is_none());
        assert_eq!(d["object"]["spec"]["replicas"], 3);
    }

    #[test]
    fn job_status_uses_latest_condition() {
        let job = json!({"status": {"conditions": [
            {"type": "Suspended", "lastTransitionTime": "2024-01-01T00:00:00Z"},
            {"type": "Complete", "lastTransitionTime": "2024-02-01T00:00:00Z"},
        ]}});
        assert_eq!(job_status(&job), "Complete");
        assert_eq!(job_status(&json!({})), "Pending");
    }
}
