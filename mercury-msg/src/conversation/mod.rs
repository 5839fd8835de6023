pub mod repository;
pub mod service;

pub use repository::{ConversationStore, ListCursor, PgConversationStore};
pub use service::{ConversationService, ListPage};
