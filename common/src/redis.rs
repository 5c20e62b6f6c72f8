use crate::args::RedisArgs;
use deadpool_redis::{Config as RedisPoolConfig, Pool};
use owo_colors::OwoColorize;
use redis::AsyncCommands;

/// Build a Redis pool and probe it once. Returns None when Redis is disabled
/// or unreachable; callers must treat a missing pool as "no cache".
pub async fn init_redis(args: &RedisArgs) -> Option<Pool> {
    if !args.redis_enabled {
        println!("{}", "🔌 Redis cache disabled (REDIS_ENABLED=false)".yellow());
        return None;
    }
    println!(
        "{}{}",
        "🔌 Connecting to Redis • url=".green(),
        args.url_redacted().green().dimmed(),
    );
    let pool = match RedisPoolConfig::from_url(args.url())
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create Redis pool; cache disabled");
            return None;
        }
    };
    let probe = async {
        pool.get().await.ok()?.ping::<String>().await.ok()
    };
    match probe.await {
        Some(_) => Some(pool),
        None => {
            tracing::warn!("Redis unreachable; cache disabled");
            None
        }
    }
}
