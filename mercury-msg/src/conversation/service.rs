use chrono::Utc;
use mercury_core::types::{
    Conversation, ConvType, GroupConversation, Message, NewConversation, CONV_STATUS_ACTIVE,
};
use mercury_core::CoreResult;
use std::sync::Arc;

use crate::conversation::repository::{ConversationStore, ListCursor};
use crate::preview::build_preview;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<Conversation>,
    pub has_more: bool,
    pub next_cursor: String,
}

/// Conversation rules: listing with group hot-state reconciliation, monotonic
/// read cursor, logical delete, settings, and the send-path upserts invoked
/// by the workflows.
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<Option<Conversation>> {
        self.store.get(owner_uuid, conv_id).await
    }

    /// Upsert `owner`'s view of the conversation for a freshly persisted
    /// message. `target_uuid` is the peer from the owner's perspective
    /// (other user for P2P, group uuid for GROUP).
    pub async fn upsert_for_message(
        &self,
        owner_uuid: &str,
        message: &Message,
        conv_type: ConvType,
        target_uuid: &str,
        is_sender: bool,
    ) -> CoreResult<()> {
        let preview = build_preview(&message.from_uuid, message.msg_type, &message.content);

        let row = NewConversation {
            conv_id: message.conv_id.clone(),
            conv_type: conv_type.as_i16(),
            owner_uuid: owner_uuid.to_string(),
            target_uuid: target_uuid.to_string(),
            last_msg_id: Some(message.msg_id.clone()),
            last_msg_preview: Some(preview),
            last_msg_at: Some(message.send_time),
            max_seq: message.seq,
            read_seq: if is_sender { message.seq } else { 0 },
            clear_seq: 0,
            unread_count: if is_sender { 0 } else { 1 },
            mute: false,
            pin: false,
            status: CONV_STATUS_ACTIVE,
            updated_at: Utc::now(),
        };

        self.store.upsert_for_message(row, is_sender).await
    }

    /// Rewrite the shared group hot-state for a group send. Individual member
    /// rows are NOT written here; they reconcile against this row on read.
    pub async fn upsert_group_hot(&self, message: &Message) -> CoreResult<()> {
        let preview = build_preview(&message.from_uuid, message.msg_type, &message.content);

        let row = GroupConversation {
            group_uuid: message.conv_id.clone(),
            max_seq: message.seq,
            last_msg_id: Some(message.msg_id.clone()),
            last_msg_preview: Some(preview),
            last_msg_at: Some(message.send_time),
            updated_at: Utc::now(),
        };

        self.store.upsert_group_hot(row).await
    }

    pub async fn list(
        &self,
        owner_uuid: &str,
        updated_since_ms: i64,
        cursor: &str,
        page_size: i64,
    ) -> CoreResult<ListPage> {
        let page_size = if page_size <= 0 || page_size > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        let cursor = if cursor.is_empty() {
            None
        } else {
            ListCursor::parse(cursor)
        };

        let mut rows = self
            .store
            .list(owner_uuid, updated_since_ms, cursor, page_size)
            .await?;

        let has_more = rows.len() as i64 > page_size;
        if has_more {
            rows.truncate(page_size as usize);
        }

        self.reconcile_group_rows(&mut rows).await?;

        let next_cursor = if has_more {
            rows.last()
                .map(|last| {
                    ListCursor {
                        updated_at_ms: last.updated_at.timestamp_millis(),
                        id: last.id,
                    }
                    .to_string()
                })
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(ListPage {
            items: rows,
            has_more,
            next_cursor,
        })
    }

    /// Group rows are written lazily on the owner's own sends, so their
    /// max_seq and last-message fields go stale. Overwrite them from the
    /// shared hot-state and recompute unread against the owner's read cursor.
    async fn reconcile_group_rows(&self, rows: &mut [Conversation]) -> CoreResult<()> {
        let group_uuids: Vec<String> = rows
            .iter()
            .filter(|c| c.conv_type == ConvType::Group.as_i16())
            .map(|c| c.target_uuid.clone())
            .collect();

        if group_uuids.is_empty() {
            return Ok(());
        }

        let hot = self.store.batch_get_group_hot(&group_uuids).await?;

        for row in rows.iter_mut() {
            if row.conv_type != ConvType::Group.as_i16() {
                continue;
            }
            if let Some(gc) = hot.get(&row.target_uuid) {
                row.max_seq = gc.max_seq;
                row.last_msg_id = gc.last_msg_id.clone();
                row.last_msg_preview = gc.last_msg_preview.clone();
                row.last_msg_at = gc.last_msg_at;
                row.unread_count = (gc.max_seq - row.read_seq).max(0);
            }
        }

        Ok(())
    }

    /// Advance the owner's read cursor; an older read_seq arriving late is a
    /// no-op. Returns the unread count after the update.
    pub async fn mark_read(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        read_seq: i64,
    ) -> CoreResult<i64> {
        self.store
            .update_read_seq(owner_uuid, conv_id, read_seq)
            .await
    }

    pub async fn delete(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<()> {
        self.store.delete(owner_uuid, conv_id).await
    }

    pub async fn update_settings(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        mute: Option<bool>,
        pin: Option<bool>,
    ) -> CoreResult<()> {
        self.store
            .update_settings(owner_uuid, conv_id, mute, pin)
            .await
    }
}
