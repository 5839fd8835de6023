use async_trait::async_trait;
use chrono::Utc;
use mercury_core::redis::get_connection;
use mercury_core::{CoreResult, RedisPool};
use std::collections::HashMap;
use std::time::Duration;

use crate::device_active::active_key;

/// Resolves which of a user's devices count as online right now.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn online_devices(&self, user_uuid: &str) -> CoreResult<Vec<String>>;
}

/// Resolves a group's member set. Maintained by the external group service;
/// reads here see whatever that service has written, so membership staleness
/// is bounded by its write lag.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn members(&self, group_uuid: &str) -> CoreResult<Vec<String>>;
}

/// Reads the last-seen hash written by the device-active workers and applies
/// the online window cutoff.
pub struct RedisDeviceDirectory {
    redis_pool: RedisPool,
    online_window: Duration,
}

impl RedisDeviceDirectory {
    pub fn new(redis_pool: RedisPool, online_window: Duration) -> Self {
        Self {
            redis_pool,
            online_window,
        }
    }
}

#[async_trait]
impl DeviceDirectory for RedisDeviceDirectory {
    async fn online_devices(&self, user_uuid: &str) -> CoreResult<Vec<String>> {
        let mut conn = get_connection(&self.redis_pool).await?;
        let seen: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(active_key(user_uuid))
            .query_async(&mut conn)
            .await?;

        let cutoff = Utc::now().timestamp() - self.online_window.as_secs() as i64;
        Ok(seen
            .into_iter()
            .filter(|(_, last_seen)| *last_seen >= cutoff)
            .map(|(device_id, _)| device_id)
            .collect())
    }
}

pub struct RedisGroupDirectory {
    redis_pool: RedisPool,
}

impl RedisGroupDirectory {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    fn members_key(group_uuid: &str) -> String {
        format!("group:members:{group_uuid}")
    }
}

#[async_trait]
impl GroupDirectory for RedisGroupDirectory {
    async fn members(&self, group_uuid: &str) -> CoreResult<Vec<String>> {
        let mut conn = get_connection(&self.redis_pool).await?;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(Self::members_key(group_uuid))
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }
}
