use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct DatabaseArgs {
    #[arg(long, env = "DATABASE_HOST", default_value = "localhost")]
    pub database_host: String,

    #[arg(long, env = "DATABASE_PORT", default_value_t = 5432)]
    pub database_port: u16,

    #[arg(long, env = "DATABASE_NAME", default_value = "armada")]
    pub database_name: String,

    #[arg(long, env = "DATABASE_USER", default_value = "armada")]
    pub database_user: String,

    #[arg(long, env = "DATABASE_PASSWORD")]
    pub database_password: Option<String>,

    /// PEM CA bundle for TLS-secured Postgres; unset connects without TLS.
    #[arg(long, env = "DATABASE_CA_CERT")]
    pub database_ca_cert: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    /// Disable to run without the cache layer; reads fall through upstream.
    #[arg(long, env = "REDIS_ENABLED", action = clap::ArgAction::Set, default_value_t = true)]
    pub redis_enabled: bool,

    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,

    #[arg(long, env = "REDIS_USERNAME")]
    pub redis_username: Option<String>,

    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,
}

impl RedisArgs {
    pub fn url_redacted(&self) -> String {
        format!(
            "redis://{}:{}@{}:{}/{}",
            self.redis_username.as_deref().unwrap_or(""),
            self.redis_password.as_deref().map(|_| "****").unwrap_or(""),
            self.redis_host,
            self.redis_port,
            self.redis_db,
        )
    }

    pub fn url(&self) -> String {
        let mut url = String::from("redis://");
        if let Some(ref username) = self.redis_username {
            url.push_str(username);
            if let Some(ref password) = self.redis_password {
                url.push(':');
                url.push_str(password);
            }
            url.push('@');
        } else if let Some(ref password) = self.redis_password {
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&format!(
            "{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        ));
        url
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AuthArgs {
    /// Application secret. Also the JWT signing key unless JWT_SECRET_KEY is set.
    #[arg(long, env = "SECRET_KEY", default_value = "change-me-in-production")]
    pub secret_key: String,

    #[arg(long, env = "JWT_SECRET_KEY")]
    pub jwt_secret_key: Option<String>,

    #[arg(long, env = "ACCESS_TOKEN_EXPIRE_MINUTES", default_value_t = 30)]
    pub access_token_expire_minutes: i64,
}

impl AuthArgs {
    pub fn jwt_secret(&self) -> &str {
        self.jwt_secret_key.as_deref().unwrap_or(&self.secret_key)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CorsArgs {
    /// Comma-separated list of allowed origins. Empty means mirror (dev mode).
    #[arg(long, env = "CORS_ORIGINS", default_value = "")]
    pub cors_origins: String,

    /// Comma-separated list of allowed Host headers. Empty disables the check.
    #[arg(long, env = "ALLOWED_HOSTS", default_value = "")]
    pub allowed_hosts: String,
}

impl CorsArgs {
    pub fn origins(&self) -> Vec<String> {
        split_csv(&self.cors_origins)
    }

    pub fn hosts(&self) -> Vec<String> {
        split_csv(&self.allowed_hosts)
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Parser, Debug, Clone)]
pub struct BackgroundArgs {
    #[arg(long, env = "ENABLE_BACKGROUND_TASKS", action = clap::ArgAction::Set, default_value_t = true)]
    pub enable_background_tasks: bool,

    /// Lock file path; defaults to the OS temp directory when unset.
    #[arg(long, env = "BACKGROUND_TASKS_LOCKFILE")]
    pub background_tasks_lockfile: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, env = "AUDIT_LOG_RETENTION_DAYS", default_value_t = 30)]
    pub audit_log_retention_days: i64,

    #[arg(long, env = "AUDIT_LOG_CLEANUP_INTERVAL_HOURS", default_value_t = 24)]
    pub audit_log_cleanup_interval_hours: u64,

    #[arg(long, env = "AUDIT_LOG_CLEANUP_BATCH_SIZE", default_value_t = 5000)]
    pub audit_log_cleanup_batch_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_password_when_set() {
        let args = RedisArgs {
            redis_enabled: true,
            redis_host: "cache".into(),
            redis_port: 6380,
            redis_db: 2,
            redis_username: None,
            redis_password: Some("hunter2".into()),
        };
        assert_eq!(args.url(), "redis://:hunter2@cache:6380/2");
        assert!(!args.url_redacted().contains("hunter2"));
    }

    #[test]
    fn cors_origins_split_and_trimmed() {
        let args = CorsArgs {
            cors_origins: "http://localhost:3000, http://ui:3000,".into(),
            allowed_hosts: "".into(),
        };
        assert_eq!(
            args.origins(),
            vec!["http://localhost:3000", "http://ui:3000"]
        );
        assert!(args.hosts().is_empty());
    }

    #[test]
    fn jwt_secret_falls_back_to_secret_key() {
        let args = AuthArgs {
            secret_key: "app-secret".into(),
            jwt_secret_key: None,
            access_token_expire_minutes: 30,
        };
        assert_eq!(args.jwt_secret(), "app-secret");
        let args = AuthArgs {
            jwt_secret_key: Some("jwt-secret".into()),
            ..args
        };
        assert_eq!(args.jwt_secret(), "jwt-secret");
    }
}
