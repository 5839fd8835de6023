use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::RunQueryDsl;
use mercury_core::schema::{conversation, group_conversation};
use mercury_core::types::{
    Conversation, GroupConversation, NewConversation, CONV_STATUS_ACTIVE, CONV_STATUS_DELETED,
};
use mercury_core::{CoreError, CoreResult, DbPool};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Compound pagination cursor `"{updated_at_ms}_{id}"`: strictly descending
/// on `(updated_at, id)`, so a page never repeats or skips rows while other
/// rows are being touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    pub updated_at_ms: i64,
    pub id: i64,
}

impl ListCursor {
    /// A malformed cursor is treated as absent, matching first-page behavior.
    pub fn parse(raw: &str) -> Option<Self> {
        let (ms, id) = raw.split_once('_')?;
        Some(ListCursor {
            updated_at_ms: ms.parse().ok()?,
            id: id.parse().ok()?,
        })
    }
}

impl fmt::Display for ListCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.updated_at_ms, self.id)
    }
}

/// Conversation table + group hot-state table access.
///
/// Counter and cursor fields are only ever moved by in-statement expressions
/// (`unread_count + 1`, `GREATEST(read_seq, ?)`), never by read-modify-write
/// in application memory.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<Option<Conversation>>;

    /// Returns up to `limit + 1` rows so the caller can decide `has_more`.
    /// `updated_since_ms == 0` restricts to active rows (full sync);
    /// `> 0` returns every row touched since, deleted ones included.
    async fn list(
        &self,
        owner_uuid: &str,
        updated_since_ms: i64,
        cursor: Option<ListCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Conversation>>;

    /// Upsert on `(owner_uuid, conv_id)`. The update arm only touches the
    /// send-path fields (max_seq, last_msg_*, status, updated_at) plus
    /// `read_seq = max_seq` for the sender or `unread_count + 1` for the
    /// receiver; mute, pin and clear_seq are preserved.
    async fn upsert_for_message(&self, row: NewConversation, is_sender: bool) -> CoreResult<()>;

    /// `read_seq = GREATEST(read_seq, ?)`; returns the resulting unread count.
    async fn update_read_seq(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        read_seq: i64,
    ) -> CoreResult<i64>;

    /// Logical delete: status=deleted, clear_seq=max_seq, read_seq=max_seq,
    /// unread_count=0. The next upsert_for_message reactivates the row.
    async fn delete(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<()>;

    /// Updates only the fields that are `Some`.
    async fn update_settings(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        mute: Option<bool>,
        pin: Option<bool>,
    ) -> CoreResult<()>;

    async fn upsert_group_hot(&self, row: GroupConversation) -> CoreResult<()>;

    async fn batch_get_group_hot(
        &self,
        group_uuids: &[String],
    ) -> CoreResult<HashMap<String, GroupConversation>>;
}

pub struct PgConversationStore {
    db_pool: Arc<DbPool>,
}

impl PgConversationStore {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<Option<Conversation>> {
        let mut conn = self.db_pool.get().await?;
        let found = conversation::table
            .filter(conversation::owner_uuid.eq(owner_uuid))
            .filter(conversation::conv_id.eq(conv_id))
            .select(Conversation::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(found)
    }

    async fn list(
        &self,
        owner_uuid: &str,
        updated_since_ms: i64,
        cursor: Option<ListCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Conversation>> {
        let mut conn = self.db_pool.get().await?;

        let mut query = conversation::table
            .filter(conversation::owner_uuid.eq(owner_uuid))
            .select(Conversation::as_select())
            .into_boxed();

        if updated_since_ms > 0 {
            let since = ms_to_datetime(updated_since_ms)?;
            query = query.filter(conversation::updated_at.gt(since));
        } else {
            query = query.filter(conversation::status.eq(CONV_STATUS_ACTIVE));
        }

        if let Some(cur) = cursor {
            let cur_time = ms_to_datetime(cur.updated_at_ms)?;
            query = query.filter(
                conversation::updated_at.lt(cur_time).or(conversation::updated_at
                    .eq(cur_time)
                    .and(conversation::id.lt(cur.id))),
            );
        }

        let rows = query
            .order((conversation::updated_at.desc(), conversation::id.desc()))
            .limit(limit + 1)
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn upsert_for_message(&self, row: NewConversation, is_sender: bool) -> CoreResult<()> {
        let mut conn = self.db_pool.get().await?;

        let insert = diesel::insert_into(conversation::table)
            .values(&row)
            .on_conflict((conversation::owner_uuid, conversation::conv_id));

        if is_sender {
            insert
                .do_update()
                .set((
                    conversation::max_seq.eq(row.max_seq),
                    conversation::last_msg_id.eq(row.last_msg_id.clone()),
                    conversation::last_msg_preview.eq(row.last_msg_preview.clone()),
                    conversation::last_msg_at.eq(row.last_msg_at),
                    conversation::status.eq(CONV_STATUS_ACTIVE),
                    conversation::updated_at.eq(row.updated_at),
                    // The sender has obviously seen their own message.
                    conversation::read_seq.eq(row.max_seq),
                ))
                .execute(&mut conn)
                .await?;
        } else {
            insert
                .do_update()
                .set((
                    conversation::max_seq.eq(row.max_seq),
                    conversation::last_msg_id.eq(row.last_msg_id.clone()),
                    conversation::last_msg_preview.eq(row.last_msg_preview.clone()),
                    conversation::last_msg_at.eq(row.last_msg_at),
                    conversation::status.eq(CONV_STATUS_ACTIVE),
                    conversation::updated_at.eq(row.updated_at),
                    // Incremented in the statement, safe under concurrent sends.
                    conversation::unread_count.eq(conversation::unread_count + 1_i64),
                ))
                .execute(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn update_read_seq(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        read_seq: i64,
    ) -> CoreResult<i64> {
        let mut conn = self.db_pool.get().await?;

        let unread: i64 = diesel::update(
            conversation::table
                .filter(conversation::owner_uuid.eq(owner_uuid))
                .filter(conversation::conv_id.eq(conv_id)),
        )
        .set((
            conversation::read_seq.eq(sql::<BigInt>("GREATEST(read_seq, ")
                .bind::<BigInt, _>(read_seq)
                .sql(")")),
            conversation::unread_count.eq(sql::<BigInt>(
                "GREATEST(0, max_seq - GREATEST(read_seq, ",
            )
            .bind::<BigInt, _>(read_seq)
            .sql("))")),
        ))
        .returning(conversation::unread_count)
        .get_result(&mut conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::NotFound => {
                CoreError::not_found(format!("conversation {conv_id} for {owner_uuid}"))
            }
            other => other.into(),
        })?;

        Ok(unread)
    }

    async fn delete(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<()> {
        let mut conn = self.db_pool.get().await?;

        let affected = diesel::update(
            conversation::table
                .filter(conversation::owner_uuid.eq(owner_uuid))
                .filter(conversation::conv_id.eq(conv_id)),
        )
        .set((
            conversation::status.eq(CONV_STATUS_DELETED),
            conversation::clear_seq.eq(sql::<BigInt>("max_seq")),
            conversation::read_seq.eq(sql::<BigInt>("max_seq")),
            conversation::unread_count.eq(0_i64),
            conversation::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        if affected == 0 {
            return Err(CoreError::not_found(format!(
                "conversation {conv_id} for {owner_uuid}"
            )));
        }
        Ok(())
    }

    async fn update_settings(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        mute: Option<bool>,
        pin: Option<bool>,
    ) -> CoreResult<()> {
        let mut conn = self.db_pool.get().await?;

        let target = conversation::table
            .filter(conversation::owner_uuid.eq(owner_uuid))
            .filter(conversation::conv_id.eq(conv_id));

        let affected = match (mute, pin) {
            (Some(m), Some(p)) => {
                diesel::update(target)
                    .set((conversation::mute.eq(m), conversation::pin.eq(p)))
                    .execute(&mut conn)
                    .await?
            }
            (Some(m), None) => {
                diesel::update(target)
                    .set(conversation::mute.eq(m))
                    .execute(&mut conn)
                    .await?
            }
            (None, Some(p)) => {
                diesel::update(target)
                    .set(conversation::pin.eq(p))
                    .execute(&mut conn)
                    .await?
            }
            (None, None) => return Ok(()),
        };

        if affected == 0 {
            return Err(CoreError::not_found(format!(
                "conversation {conv_id} for {owner_uuid}"
            )));
        }
        Ok(())
    }

    async fn upsert_group_hot(&self, row: GroupConversation) -> CoreResult<()> {
        let mut conn = self.db_pool.get().await?;

        diesel::insert_into(group_conversation::table)
            .values(&row)
            .on_conflict(group_conversation::group_uuid)
            .do_update()
            .set((
                group_conversation::max_seq.eq(row.max_seq),
                group_conversation::last_msg_id.eq(row.last_msg_id.clone()),
                group_conversation::last_msg_preview.eq(row.last_msg_preview.clone()),
                group_conversation::last_msg_at.eq(row.last_msg_at),
                group_conversation::updated_at.eq(row.updated_at),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn batch_get_group_hot(
        &self,
        group_uuids: &[String],
    ) -> CoreResult<HashMap<String, GroupConversation>> {
        if group_uuids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.db_pool.get().await?;
        let rows: Vec<GroupConversation> = group_conversation::table
            .filter(group_conversation::group_uuid.eq_any(group_uuids))
            .select(GroupConversation::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|gc| (gc.group_uuid.clone(), gc))
            .collect())
    }
}

fn ms_to_datetime(ms: i64) -> CoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| CoreError::invalid_argument(format!("timestamp out of range: {ms}")))
}
