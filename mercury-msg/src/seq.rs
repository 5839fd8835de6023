use async_trait::async_trait;
use mercury_core::redis::get_connection;
use mercury_core::{CoreResult, RedisPool};

/// Allocates the next sequence number for a conversation. Values are strictly
/// increasing per conv_id; gaps from abandoned allocations are permitted.
#[async_trait]
pub trait SeqAllocator: Send + Sync {
    async fn allocate(&self, conv_id: &str) -> CoreResult<i64>;
}

/// Redis-backed allocator: one atomic `INCR seq:{conv_id}` per allocation,
/// no coordination across conversations.
pub struct RedisSeqAllocator {
    redis_pool: RedisPool,
}

impl RedisSeqAllocator {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }
}

#[async_trait]
impl SeqAllocator for RedisSeqAllocator {
    async fn allocate(&self, conv_id: &str) -> CoreResult<i64> {
        let mut conn = get_connection(&self.redis_pool).await?;
        let seq: i64 = redis::cmd("INCR")
            .arg(format!("seq:{conv_id}"))
            .query_async(&mut conn)
            .await?;
        Ok(seq)
    }
}
