use kube::api::ApiResource;
use std::fmt;
use std::str::FromStr;

use crate::cache::ttl;

/// The closed set of upstream kinds the fabric manages. The mapping to
/// `ApiResource` is static; no discovery round-trip is needed for builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    CronJob,
    Job,
    Service,
    ConfigMap,
    Secret,
    Ingress,
    NetworkPolicy,
    PersistentVolume,
    PersistentVolumeClaim,
    StorageClass,
    ResourceQuota,
    LimitRange,
    Role,
    RoleBinding,
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
    HorizontalPodAutoscaler,
    PodDisruptionBudget,
    Event,
    Node,
    Namespace,
}

/// (group, version, kind, plural, namespaced, route label)
type KindSpec = (&'static str, &'static str, &'static str, &'static str, bool, &'static str);

impl ResourceKind {
    pub const ALL: [ResourceKind; 26] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::CronJob,
        ResourceKind::Job,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::Ingress,
        ResourceKind::NetworkPolicy,
        ResourceKind::PersistentVolume,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::StorageClass,
        ResourceKind::ResourceQuota,
        ResourceKind::LimitRange,
        ResourceKind::Role,
        ResourceKind::RoleBinding,
        ResourceKind::ServiceAccount,
        ResourceKind::ClusterRole,
        ResourceKind::ClusterRoleBinding,
        ResourceKind::HorizontalPodAutoscaler,
        ResourceKind::PodDisruptionBudget,
        ResourceKind::Event,
        ResourceKind::Node,
        ResourceKind::Namespace,
    ];

    /// The four kinds streamed by the per-cluster resource watcher.
    pub const WATCHED: [ResourceKind; 4] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::Job,
        ResourceKind::Service,
    ];

    fn spec(self) -> KindSpec {
        use ResourceKind::*;
        match self {
            Pod => ("", "v1", "Pod", "pods", true, "pods"),
            Deployment => ("apps", "v1", "Deployment", "deployments", true, "deployments"),
            StatefulSet => ("apps", "v1", "StatefulSet", "statefulsets", true, "statefulsets"),
            DaemonSet => ("apps", "v1", "DaemonSet", "daemonsets", true, "daemonsets"),
            CronJob => ("batch", "v1", "CronJob", "cronjobs", true, "cronjobs"),
            Job => ("batch", "v1", "Job", "jobs", true, "jobs"),
            Service => ("", "v1", "Service", "services", true, "services"),
            ConfigMap => ("", "v1", "ConfigMap", "configmaps", true, "configmaps"),
            Secret => ("", "v1", "Secret", "secrets", true, "secrets"),
            Ingress => ("networking.k8s.io", "v1", "Ingress", "ingresses", true, "ingresses"),
            NetworkPolicy => (
                "networking.k8s.io",
                "v1",
                "NetworkPolicy",
                "networkpolicies",
                true,
                "network-policies",
            ),
            PersistentVolume => (
                "",
                "v1",
                "PersistentVolume",
                "persistentvolumes",
                false,
                "persistent-volumes",
            ),
            PersistentVolumeClaim => (
                "",
                "v1",
                "PersistentVolumeClaim",
                "persistentvolumeclaims",
                true,
                "persistent-volume-claims",
            ),
            StorageClass => (
                "storage.k8s.io",
                "v1",
                "StorageClass",
                "storageclasses",
                false,
                "storage-classes",
            ),
            ResourceQuota => ("", "v1", "ResourceQuota", "resourcequotas", true, "resource-quotas"),
            LimitRange => ("", "v1", "LimitRange", "limitranges", true, "limit-ranges"),
            Role => ("rbac.authorization.k8s.io", "v1", "Role", "roles", true, "roles"),
            RoleBinding => (
                "rbac.authorization.k8s.io",
                "v1",
                "RoleBinding",
                "rolebindings",
                true,
                "role-bindings",
            ),
            ServiceAccount => ("", "v1", "ServiceAccount", "serviceaccounts", true, "service-accounts"),
            ClusterRole => (
                "rbac.authorization.k8s.io",
                "v1",
                "ClusterRole",
                "clusterroles",
                false,
                "cluster-roles",
            ),
            ClusterRoleBinding => (
                "rbac.authorization.k8s.io",
                "v1",
                "ClusterRoleBinding",
                "clusterrolebindings",
                false,
                "cluster-role-bindings",
            ),
            HorizontalPodAutoscaler => (
                "autoscaling",
                "v2",
                "HorizontalPodAutoscaler",
                "horizontalpodautoscalers",
                true,
                "horizontal-pod-autoscalers",
            ),
            PodDisruptionBudget => (
                "policy",
                "v1",
                "PodDisruptionBudget",
                "poddisruptionbudgets",
                true,
                "pod-disruption-budgets",
            ),
            Event => ("", "v1", "Event", "events", true, "events"),
            Node => ("", "v1", "Node", "nodes", false, "nodes"),
            Namespace => ("", "v1", "Namespace", "namespaces", false, "namespaces"),
        }
    }

    pub fn group(self) -> &'static str {
        self.spec().0
    }

    pub fn version(self) -> &'static str {
        self.spec().1
    }

    pub fn kind_name(self) -> &'static str {
        self.spec().2
    }

    pub fn plural(self) -> &'static str {
        self.spec().3
    }

    pub fn namespaced(self) -> bool {
        self.spec().4
    }

    /// Stable label used in routes, cache keys and WebSocket frames.
    pub fn label(self) -> &'static str {
        self.spec().5
    }

    pub fn api_resource(self) -> ApiResource {
        let (group, version, kind, plural, _, _) = self.spec();
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", group, version)
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    /// List-cache TTL class for this kind.
    pub fn list_ttl(self) -> u64 {
        match self {
            ResourceKind::Node => ttl::NODES,
            ResourceKind::Namespace => ttl::NAMESPACES,
            _ => ttl::LIST_DEFAULT,
        }
    }

    /// Kinds whose scale subresource is patchable.
    pub fn scalable(self) -> bool {
        matches!(self, ResourceKind::Deployment | ResourceKind::StatefulSet)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.label() == s || k.plural() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.label().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn api_resource_carries_group_qualified_api_version() {
        let ar = ResourceKind::Deployment.api_resource();
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "deployments");
        let ar = ResourceKind::Pod.api_resource();
        assert_eq!(ar.api_version, "v1");
    }

    #[test]
    fn scope_matches_upstream() {
        assert!(ResourceKind::Pod.namespaced());
        assert!(!ResourceKind::Node.namespaced());
        assert!(!ResourceKind::ClusterRole.namespaced());
        assert!(ResourceKind::RoleBinding.namespaced());
    }
}
