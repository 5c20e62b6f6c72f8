/// Error taxonomy for the cluster fabric. Handlers map these onto HTTP via
/// `http_status`; upstream client internals never cross this boundary.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream API error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Client pool exhausted for cluster {0}")]
    PoolExhausted(i64),

    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FabricError {
    /// HTTP status the control layer answers with for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            FabricError::Validation(_) | FabricError::Serialization(_) => 400,
            FabricError::NotFound(_) => 404,
            FabricError::Conflict(_) => 409,
            FabricError::Upstream { status, .. } => match status {
                404 => 404,
                409 => 409,
                400..=499 => 400,
                _ => 502,
            },
            FabricError::PoolExhausted(_) | FabricError::Unreachable(_) => 503,
            FabricError::Internal(_) => 500,
        }
    }
}

impl From<kube::Error> for FabricError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => FabricError::Upstream {
                status: resp.code,
                message: resp.message,
            },
            kube::Error::HyperError(e) => FabricError::Unreachable(e.to_string()),
            kube::Error::Service(e) => FabricError::Unreachable(e.to_string()),
            other => FabricError::Internal(other.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for FabricError {
    fn from(e: serde_yaml::Error) -> Self {
        FabricError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Serialization(e.to_string())
    }
}

pub type FabricResult<T> = Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_mapping_follows_class() {
        let s = |code| {
            FabricError::Upstream {
                status: code,
                message: String::new(),
            }
            .http_status()
        };
        assert_eq!(s(404), 404);
        assert_eq!(s(409), 409);
        assert_eq!(s(422), 400);
        assert_eq!(s(500), 502);
        assert_eq!(s(503), 502);
    }

    #[test]
    fn saturation_maps_to_service_unavailable() {
        assert_eq!(FabricError::PoolExhausted(1).http_status(), 503);
        assert_eq!(
            FabricError::Unreachable("timed out".into()).http_status(),
            503
        );
    }
}
