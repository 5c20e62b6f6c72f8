use serde::Serialize;

/// Namespaces that may never be deleted through this API, whatever the role.
pub const SYSTEM_NAMESPACES: [&str; 4] = ["default", "kube-system", "kube-public", "kube-node-lease"];

pub fn is_protected_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    User,
    Viewer,
}

impl Role {
    /// Unknown role strings degrade to the least-privileged role.
    pub fn parse(raw: &str) -> Role {
        match raw {
            "admin" => Role::Admin,
            "operator" => Role::Operator,
            "user" => Role::User,
            _ => Role::Viewer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Manage,
}

impl AccessLevel {
    pub fn parse(raw: &str) -> AccessLevel {
        if raw == "manage" {
            AccessLevel::Manage
        } else {
            AccessLevel::Read
        }
    }
}

/// Everything the gate needs to decide a request, resolved once per request
/// from the bearer token and the grant tables.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub tenant_id: Option<i64>,
    pub cluster_grants: Vec<(i64, AccessLevel)>,
    pub namespace_grants: Vec<(i64, String, AccessLevel)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial(pub String);

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AuthContext {
    fn cluster_grant(&self, cluster_id: i64) -> Option<AccessLevel> {
        self.cluster_grants
            .iter()
            .find(|(id, _)| *id == cluster_id)
            .map(|(_, level)| *level)
    }

    fn namespace_grant(&self, cluster_id: i64, namespace: &str) -> Option<AccessLevel> {
        self.namespace_grants
            .iter()
            .find(|(id, ns, _)| *id == cluster_id && ns == namespace)
            .map(|(_, _, level)| *level)
    }
}

/// The authorization decision. Pure over the context and the request shape;
/// it never consults the upstream cluster.
pub fn authorize(
    ctx: &AuthContext,
    level: AccessLevel,
    cluster_id: Option<i64>,
    namespace: Option<&str>,
) -> Result<(), Denial> {
    match ctx.role {
        Role::Admin | Role::Operator => Ok(()),
        Role::User => match level {
            AccessLevel::Read => Ok(()),
            AccessLevel::Manage => {
                let Some(cluster_id) = cluster_id else {
                    return Err(Denial("mutation requires a target cluster".into()));
                };
                if ctx.cluster_grant(cluster_id) == Some(AccessLevel::Manage) {
                    return Ok(());
                }
                if let Some(ns) = namespace
                    && ctx.namespace_grant(cluster_id, ns) == Some(AccessLevel::Manage)
                {
                    return Ok(());
                }
                Err(Denial(format!(
                    "manage permission required on cluster {}{}",
                    cluster_id,
                    namespace
                        .map(|ns| format!(" namespace {}", ns))
                        .unwrap_or_default()
                )))
            }
        },
        Role::Viewer => {
            if level == AccessLevel::Manage {
                return Err(Denial("viewers cannot mutate resources".into()));
            }
            match cluster_id {
                // List endpoints without a cluster target filter through
                // `allowed_cluster_ids` instead.
                None => Ok(()),
                Some(cluster_id) => {
                    if ctx.cluster_grant(cluster_id).is_some() {
                        Ok(())
                    } else {
                        Err(Denial(format!(
                            "read permission required on cluster {}",
                            cluster_id
                        )))
                    }
                }
            }
        }
    }
}

/// Cluster-id filter for list responses. `None` means unrestricted.
pub fn allowed_cluster_ids(ctx: &AuthContext) -> Option<Vec<i64>> {
    match ctx.role {
        Role::Viewer => Some(ctx.cluster_grants.iter().map(|(id, _)| *id).collect()),
        _ => None,
    }
}

/// Cluster registry writes are admin-only; operators run workloads, not
/// the registry.
pub fn can_manage_cluster_registry(ctx: &AuthContext) -> bool {
    ctx.role == Role::Admin
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: 7,
            username: "t".into(),
            role,
            tenant_id: None,
            cluster_grants: Vec::new(),
            namespace_grants: Vec::new(),
        }
    }

    #[test]
    fn admin_and_operator_pass_everything() {
        for role in [Role::Admin, Role::Operator] {
            let ctx = ctx(role);
            assert!(authorize(&ctx, AccessLevel::Manage, Some(1), Some("prod")).is_ok());
            assert!(authorize(&ctx, AccessLevel::Read, None, None).is_ok());
        }
        assert!(can_manage_cluster_registry(&ctx(Role::Admin)));
        assert!(!can_manage_cluster_registry(&ctx(Role::Operator)));
    }

    #[test]
    fn user_reads_everywhere_but_mutates_only_granted_namespaces() {
        let mut ctx = ctx(Role::User);
        ctx.namespace_grants = vec![(1, "team-a".into(), AccessLevel::Manage)];
        assert!(authorize(&ctx, AccessLevel::Read, Some(2), Some("anything")).is_ok());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(1), Some("team-a")).is_ok());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(1), Some("team-b")).is_err());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(2), Some("team-a")).is_err());
        assert!(authorize(&ctx, AccessLevel::Manage, None, None).is_err());
    }

    #[test]
    fn user_cluster_manage_grant_covers_all_namespaces() {
        let mut ctx = ctx(Role::User);
        ctx.cluster_grants = vec![(3, AccessLevel::Manage)];
        assert!(authorize(&ctx, AccessLevel::Manage, Some(3), Some("any")).is_ok());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(3), None).is_ok());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(4), None).is_err());
    }

    #[test]
    fn viewer_is_scoped_to_granted_clusters_and_read_only() {
        let mut ctx = ctx(Role::Viewer);
        ctx.cluster_grants = vec![(2, AccessLevel::Read)];
        assert!(authorize(&ctx, AccessLevel::Read, Some(2), None).is_ok());
        assert!(authorize(&ctx, AccessLevel::Read, Some(1), None).is_err());
        assert!(authorize(&ctx, AccessLevel::Manage, Some(2), None).is_err());
        assert_eq!(allowed_cluster_ids(&ctx), Some(vec![2]));
        // Unrestricted roles carry no filter.
        assert_eq!(allowed_cluster_ids(&super::tests::ctx(Role::User)), None);
    }

    #[test]
    fn viewer_without_grants_sees_nothing() {
        let ctx = ctx(Role::Viewer);
        assert_eq!(allowed_cluster_ids(&ctx), Some(Vec::new()));
        assert!(authorize(&ctx, AccessLevel::Read, Some(1), None).is_err());
    }

    #[test]
    fn system_namespaces_are_protected() {
        for ns in SYSTEM_NAMESPACES {
            assert!(is_protected_namespace(ns));
        }
        assert!(!is_protected_namespace("team-a"));
    }

    #[test]
    fn unknown_role_degrades_to_viewer() {
        assert_eq!(Role::parse("root"), Role::Viewer);
        assert_eq!(Role::parse("operator"), Role::Operator);
    }
}
