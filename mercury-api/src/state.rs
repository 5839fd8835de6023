use mercury_core::metrics::Metrics;
use mercury_core::CoreContext;
use mercury_msg::conversation::repository::PgConversationStore;
use mercury_msg::idempotency::RedisIdempotencyIndex;
use mercury_msg::message::repository::PgMessageStore;
use mercury_msg::seq::RedisSeqAllocator;
use mercury_msg::{
    ConversationService, KafkaPushProducer, MarkReadWorkflow, MessageService, RecallWorkflow,
    SendWorkflow,
};
use mercury_push::{ConnectionRegistry, DeviceActiveSyncer};
use std::sync::Arc;
use std::time::Duration;

/// Everything a gateway handler needs, cloneable per request.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: CoreContext,
    pub registry: Arc<ConnectionRegistry>,
    pub syncer: Arc<DeviceActiveSyncer>,
    pub metrics: Arc<Metrics>,
    pub msg_service: Arc<MessageService>,
    pub conv_service: Arc<ConversationService>,
    pub send_workflow: Arc<SendWorkflow>,
    pub recall_workflow: Arc<RecallWorkflow>,
    pub mark_read_workflow: Arc<MarkReadWorkflow>,
}

impl ApiState {
    pub fn new(
        ctx: CoreContext,
        registry: Arc<ConnectionRegistry>,
        syncer: Arc<DeviceActiveSyncer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let msg_store = Arc::new(PgMessageStore::new(ctx.db_pool.clone()));
        let seq = Arc::new(RedisSeqAllocator::new(ctx.redis_pool.clone()));
        let idempotency = Arc::new(RedisIdempotencyIndex::new(
            ctx.redis_pool.clone(),
            Duration::from_secs(ctx.config.msg.dedupe_ttl_secs),
        ));
        let msg_service = Arc::new(MessageService::new(
            msg_store,
            seq,
            idempotency,
            ctx.config.msg.recall_window(),
            ctx.config.msg.max_pull_limit,
        ));

        let conv_store = Arc::new(PgConversationStore::new(ctx.db_pool.clone()));
        let conv_service = Arc::new(ConversationService::new(conv_store));

        let publisher = Arc::new(KafkaPushProducer::new(
            ctx.kafka_producer.clone(),
            ctx.config.kafka.push_topic.clone(),
        ));

        let send_workflow = Arc::new(SendWorkflow::new(
            msg_service.clone(),
            conv_service.clone(),
            publisher.clone(),
        ));
        let recall_workflow = Arc::new(RecallWorkflow::new(msg_service.clone(), publisher.clone()));
        let mark_read_workflow =
            Arc::new(MarkReadWorkflow::new(conv_service.clone(), publisher));

        ApiState {
            ctx,
            registry,
            syncer,
            metrics,
            msg_service,
            conv_service,
            send_workflow,
            recall_workflow,
            mark_read_workflow,
        }
    }
}
