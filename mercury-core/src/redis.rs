use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::sync::Arc;
use tracing;

use crate::config::{mask_url_credentials, RedisConfig};
use crate::error::{CoreError, CoreResult};

pub type RedisPool = Arc<Client>;
pub type RedisConnection = MultiplexedConnection;

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!("Connecting to Redis at {}", mask_url_credentials(&config.url));

    let client = Client::open(config.url.as_str()).context("create Redis client")?;

    // One PING up front: sequence allocation depends on this store, so a
    // misconfigured URL should fail startup, not the first send.
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("connect to Redis")?;
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .context("ping Redis")?;

    tracing::info!("Redis connection established");

    Ok(Arc::new(client))
}

/// Per-call connection handle for the domain layer; failures surface as
/// `Transient` like every other store outage.
pub async fn get_connection(pool: &RedisPool) -> CoreResult<RedisConnection> {
    pool.get_multiplexed_async_connection()
        .await
        .map_err(CoreError::from)
}
