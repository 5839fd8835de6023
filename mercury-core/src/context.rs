use crate::config::Config;
use crate::db::{create_pool as create_db_pool, DbPool};
use crate::kafka::{create_consumer, create_producer, KafkaConsumer, KafkaProducer};
use crate::redis::{create_pool as create_redis_pool, RedisPool};
use std::sync::Arc;

#[derive(Clone)]
pub struct CoreContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
    pub redis_pool: RedisPool,
    pub kafka_producer: KafkaProducer,
}

impl CoreContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let db_pool = create_db_pool(&config.database).await?;
        let redis_pool = create_redis_pool(&config.redis).await?;
        let kafka_producer = create_producer(&config.kafka)?;

        Ok(CoreContext {
            config: Arc::new(config),
            db_pool,
            redis_pool,
            kafka_producer,
        })
    }

    pub fn create_consumer(&self, group_id: Option<&str>) -> anyhow::Result<KafkaConsumer> {
        create_consumer(&self.config.kafka, group_id)
    }
}
