use async_trait::async_trait;
use mercury_core::redis::get_connection;
use mercury_core::types::Message;
use mercury_core::{CoreResult, RedisPool};
use std::time::Duration;

/// Dedupe cache keyed by the `(sender, device, client_msg_id)` triple.
///
/// This is the fast path only: the message table's unique index on the same
/// triple catches duplicates that arrive after the TTL or that race past the
/// cache.
#[async_trait]
pub trait IdempotencyIndex: Send + Sync {
    async fn lookup(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>>;

    async fn record(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
        message: &Message,
    ) -> CoreResult<()>;
}

pub struct RedisIdempotencyIndex {
    redis_pool: RedisPool,
    ttl: Duration,
}

impl RedisIdempotencyIndex {
    pub fn new(redis_pool: RedisPool, ttl: Duration) -> Self {
        Self { redis_pool, ttl }
    }

    fn key(from_uuid: &str, device_id: &str, client_msg_id: &str) -> String {
        format!("msg:dedupe:{from_uuid}:{device_id}:{client_msg_id}")
    }
}

#[async_trait]
impl IdempotencyIndex for RedisIdempotencyIndex {
    async fn lookup(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>> {
        let mut conn = get_connection(&self.redis_pool).await?;
        let cached: Option<String> = redis::cmd("GET")
            .arg(Self::key(from_uuid, device_id, client_msg_id))
            .query_async(&mut conn)
            .await?;

        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn record(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
        message: &Message,
    ) -> CoreResult<()> {
        let mut conn = get_connection(&self.redis_pool).await?;
        redis::cmd("SET")
            .arg(Self::key(from_uuid, device_id, client_msg_id))
            .arg(serde_json::to_string(message)?)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
