pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ids;
pub mod kafka;
pub mod metrics;
pub mod redis;
pub mod schema;
pub mod types;

pub use config::Config;
pub use context::CoreContext;
pub use db::DbPool;
pub use error::{CoreError, CoreResult};
pub use kafka::{KafkaConsumer, KafkaProducer};
pub use redis::RedisPool;
