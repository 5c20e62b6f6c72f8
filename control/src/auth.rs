use anyhow::{Context, Result, anyhow};
use axum::{extract::FromRequestParts, http::request::Parts, response::Response};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use armada_common::response;

use crate::authz::{AccessLevel, AuthContext, Role};
use crate::db;
use crate::models::User;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub tenant_id: Option<i64>,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Issues and verifies the locally signed HS256 access tokens.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expire_minutes: i64,
}

impl TokenAuthority {
    pub fn new(secret: &str, expire_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expire_minutes,
        }
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expire_minutes * 60
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.clone(),
            tenant_id: user.tenant_id,
            iat: now,
            exp: now + self.expire_minutes * 60,
            token_type: "access".into(),
        };
        encode(&Header::default(), &claims, &self.encoding).context("failed to sign token")
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .context("invalid token")?;
        if data.claims.token_type != "access" {
            return Err(anyhow!("not an access token"));
        }
        Ok(data.claims)
    }
}

/// Salted SHA-256 in `sha256$<salt>$<digest>` form.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let salt_hex = hex::encode(salt);
    let digest = hex::encode(Sha256::digest(format!("{}{}", salt_hex, password)));
    format!("sha256${}${}", salt_hex, digest)
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    let mut parts = hashed.split('$');
    let (Some(algo), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algo != "sha256" {
        return false;
    }
    let digest = hex::encode(Sha256::digest(format!("{}{}", salt, password)));
    // Constant-time comparison over the hex digests.
    digest.len() == expected.len()
        && digest
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// The authenticated caller. Extraction verifies the bearer token, loads the
/// user row and its grants, and assembles the authorization context.
pub struct CurrentUser(pub AuthContext);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| response::unauthorized(anyhow!("missing bearer token")))?;
        let ctx = resolve_context(state, &token)
            .await
            .map_err(response::unauthorized)?;
        Ok(CurrentUser(ctx))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Token → claims → user row → grants. Shared by the HTTP extractor and the
/// WebSocket handshake.
pub async fn resolve_context(state: &AppState, token: &str) -> Result<AuthContext> {
    let claims = state.tokens.verify(token)?;
    let user_id: i64 = claims.sub.parse().context("malformed subject claim")?;
    let user = db::get_user_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| anyhow!("user not found or inactive"))?;

    let cluster_grants = db::cluster_grants(&state.db, user.id)
        .await?
        .into_iter()
        .map(|(cluster_id, level)| (cluster_id, AccessLevel::parse(&level)))
        .collect();
    let namespace_grants = db::namespace_grants(&state.db, user.id)
        .await?
        .into_iter()
        .map(|(cluster_id, ns, level)| (cluster_id, ns, AccessLevel::parse(&level)))
        .collect();

    Ok(AuthContext {
        user_id: user.id,
        username: user.username,
        role: Role::parse(&user.role),
        tenant_id: user.tenant_id,
        cluster_grants,
        namespace_grants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 42,
            username: "op".into(),
            hashed_password: hash_password("secret"),
            email: None,
            role: "operator".into(),
            tenant_id: Some(3),
            is_active: true,
        }
    }

    #[test]
    fn password_round_trip() {
        let hashed = hash_password("hunter2");
        assert!(verify_password("hunter2", &hashed));
        assert!(!verify_password("hunter3", &hashed));
        assert!(!verify_password("hunter2", "garbage"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn token_round_trip_carries_role_and_tenant() {
        let authority = TokenAuthority::new("test-secret", 30);
        let token = authority.issue(&user()).unwrap();
        let claims = authority.verify(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, "operator");
        assert_eq!(claims.tenant_id, Some(3));
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let issuer = TokenAuthority::new("secret-a", 30);
        let verifier = TokenAuthority::new("secret-b", 30);
        let token = issuer.issue(&user()).unwrap();
        assert!(verifier.verify(&token).is_err());
    }
}
