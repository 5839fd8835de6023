pub mod conv_id;
pub mod conversation;
pub mod idempotency;
pub mod message;
pub mod preview;
pub mod producer;
pub mod seq;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;

pub use conversation::service::ConversationService;
pub use message::service::MessageService;
pub use producer::{EventPublisher, KafkaPushProducer};
pub use workflow::mark_read::MarkReadWorkflow;
pub use workflow::recall::RecallWorkflow;
pub use workflow::send::SendWorkflow;
