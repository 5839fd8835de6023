use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use mercury_core::schema::message;
use mercury_core::types::{Message, MessageStatus, NewMessage};
use mercury_core::{CoreResult, DbPool};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDirection {
    /// seq > anchor, ascending.
    Forward,
    /// seq < anchor, descending.
    Backward,
}

/// Message table access. Everything here is conversation-scoped; the unique
/// indexes on `msg_id`, `(conv_id, seq)` and the sender triple are assumed.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert one message and return the stored row.
    /// Fails with `AlreadyExists` when the sender triple is already taken.
    async fn insert(&self, row: NewMessage) -> CoreResult<Message>;

    /// Fetch by the dedupe triple: the winner of an insert race.
    async fn get_by_sender_triple(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>>;

    async fn get_by_id(&self, conv_id: &str, msg_id: &str) -> CoreResult<Option<Message>>;

    async fn get_by_seq_range(
        &self,
        conv_id: &str,
        anchor_seq: i64,
        direction: PullDirection,
        limit: i64,
        clear_seq: i64,
    ) -> CoreResult<Vec<Message>>;

    async fn get_by_ids(&self, conv_id: &str, msg_ids: &[String]) -> CoreResult<Vec<Message>>;

    /// Flip a message to `status` and replace its content, skipping rows that
    /// already carry the status (recall races write once). Returns the row as
    /// stored afterwards.
    async fn update_status(
        &self,
        conv_id: &str,
        msg_id: &str,
        status: MessageStatus,
        content: serde_json::Value,
    ) -> CoreResult<Message>;
}

pub struct PgMessageStore {
    db_pool: Arc<DbPool>,
}

impl PgMessageStore {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, row: NewMessage) -> CoreResult<Message> {
        let mut conn = self.db_pool.get().await?;
        let stored = diesel::insert_into(message::table)
            .values(&row)
            .returning(Message::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(stored)
    }

    async fn get_by_sender_triple(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>> {
        let mut conn = self.db_pool.get().await?;
        let found = message::table
            .filter(message::from_uuid.eq(from_uuid))
            .filter(message::device_id.eq(device_id))
            .filter(message::client_msg_id.eq(client_msg_id))
            .select(Message::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(found)
    }

    async fn get_by_id(&self, conv_id: &str, msg_id: &str) -> CoreResult<Option<Message>> {
        let mut conn = self.db_pool.get().await?;
        let found = message::table
            .filter(message::conv_id.eq(conv_id))
            .filter(message::msg_id.eq(msg_id))
            .select(Message::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(found)
    }

    async fn get_by_seq_range(
        &self,
        conv_id: &str,
        anchor_seq: i64,
        direction: PullDirection,
        limit: i64,
        clear_seq: i64,
    ) -> CoreResult<Vec<Message>> {
        let mut conn = self.db_pool.get().await?;

        let mut query = message::table
            .filter(message::conv_id.eq(conv_id))
            .filter(message::seq.gt(clear_seq))
            .select(Message::as_select())
            .into_boxed();

        query = match direction {
            PullDirection::Forward => query
                .filter(message::seq.gt(anchor_seq))
                .order(message::seq.asc()),
            PullDirection::Backward => query
                .filter(message::seq.lt(anchor_seq))
                .order(message::seq.desc()),
        };

        let rows = query.limit(limit).load(&mut conn).await?;
        Ok(rows)
    }

    async fn get_by_ids(&self, conv_id: &str, msg_ids: &[String]) -> CoreResult<Vec<Message>> {
        if msg_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.db_pool.get().await?;
        let rows = message::table
            .filter(message::conv_id.eq(conv_id))
            .filter(message::msg_id.eq_any(msg_ids))
            .order(message::seq.asc())
            .select(Message::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn update_status(
        &self,
        conv_id: &str,
        msg_id: &str,
        status: MessageStatus,
        content: serde_json::Value,
    ) -> CoreResult<Message> {
        let mut conn = self.db_pool.get().await?;

        let updated = diesel::update(
            message::table
                .filter(message::conv_id.eq(conv_id))
                .filter(message::msg_id.eq(msg_id))
                .filter(message::status.ne(status.as_i16())),
        )
        .set((
            message::status.eq(status.as_i16()),
            message::content.eq(&content),
            message::updated_at.eq(chrono::Utc::now()),
        ))
        .returning(Message::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        match updated {
            Some(row) => Ok(row),
            // Lost a race to an identical update: hand back the winner's row.
            None => {
                let row = message::table
                    .filter(message::conv_id.eq(conv_id))
                    .filter(message::msg_id.eq(msg_id))
                    .select(Message::as_select())
                    .first(&mut conn)
                    .await?;
                Ok(row)
            }
        }
    }
}
