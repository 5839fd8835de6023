use async_trait::async_trait;
use mercury_core::kafka::produce_message;
use mercury_core::types::PushEvent;
use mercury_core::{CoreResult, KafkaProducer};

/// Publishes push events to the broker. Events for one conversation must be
/// keyed by its conv_id so downstream consumers observe them in order.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, conv_id: &str, event: &PushEvent) -> CoreResult<()>;
}

pub struct KafkaPushProducer {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaPushProducer {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaPushProducer {
    async fn publish(&self, conv_id: &str, event: &PushEvent) -> CoreResult<()> {
        let payload = serde_json::to_vec(event)?;
        produce_message(&self.producer, &self.topic, Some(conv_id), &payload).await
    }
}
