pub mod repository;
pub mod service;

pub use repository::{MessageStore, PgMessageStore, PullDirection};
pub use service::{CreateMessageRequest, CreateMessageResult, MessageService};
