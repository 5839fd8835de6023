//! In-memory stand-ins for the external stores, mirroring the expression
//! semantics the Postgres implementations rely on.

use async_trait::async_trait;
use chrono::Utc;
use mercury_core::types::{
    Conversation, ConvType, GroupConversation, Message, MessageStatus, NewConversation,
    NewMessage, PushEvent, CONV_STATUS_ACTIVE, CONV_STATUS_DELETED, MSG_TYPE_TEXT,
};
use mercury_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crate::conversation::repository::{ConversationStore, ListCursor};
use crate::idempotency::IdempotencyIndex;
use crate::message::repository::{MessageStore, PullDirection};
use crate::producer::EventPublisher;
use crate::seq::SeqAllocator;

pub fn text_request(
    from: &str,
    device: &str,
    client_msg_id: &str,
    target: &str,
    text: &str,
) -> crate::message::service::CreateMessageRequest {
    crate::message::service::CreateMessageRequest {
        from_uuid: from.to_string(),
        device_id: device.to_string(),
        client_msg_id: client_msg_id.to_string(),
        conv_type: ConvType::P2p,
        target_uuid: target.to_string(),
        msg_type: MSG_TYPE_TEXT,
        content: serde_json::json!({"text": text}),
    }
}

pub fn text_message(conv_id: &str, seq: i64, from: &str, device: &str, text: &str) -> Message {
    let now = Utc::now();
    Message {
        id: seq,
        conv_id: conv_id.to_string(),
        seq,
        msg_id: mercury_core::ids::new_msg_id(),
        client_msg_id: format!("cmid-{seq}"),
        from_uuid: from.to_string(),
        device_id: device.to_string(),
        msg_type: MSG_TYPE_TEXT,
        content: serde_json::json!({"text": text}),
        status: MessageStatus::Normal.as_i16(),
        send_time: now,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
pub struct MemMessageStore {
    rows: Mutex<Vec<Message>>,
    next_id: AtomicI64,
}

impl MemMessageStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, msg_id: &str) -> Option<Message> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.msg_id == msg_id)
            .cloned()
    }

    pub fn age_message(&self, msg_id: &str, by: chrono::Duration) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|m| m.msg_id == msg_id) {
            row.send_time = row.send_time - by;
        }
    }
}

#[async_trait]
impl MessageStore for MemMessageStore {
    async fn insert(&self, row: NewMessage) -> CoreResult<Message> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|m| {
            m.from_uuid == row.from_uuid
                && m.device_id == row.device_id
                && m.client_msg_id == row.client_msg_id
        }) {
            return Err(CoreError::AlreadyExists("sender triple".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let stored = Message {
            id,
            conv_id: row.conv_id,
            seq: row.seq,
            msg_id: row.msg_id,
            client_msg_id: row.client_msg_id,
            from_uuid: row.from_uuid,
            device_id: row.device_id,
            msg_type: row.msg_type,
            content: row.content,
            status: row.status,
            send_time: row.send_time,
            created_at: now,
            updated_at: now,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn get_by_sender_triple(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| {
                m.from_uuid == from_uuid
                    && m.device_id == device_id
                    && m.client_msg_id == client_msg_id
            })
            .cloned())
    }

    async fn get_by_id(&self, conv_id: &str, msg_id: &str) -> CoreResult<Option<Message>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.conv_id == conv_id && m.msg_id == msg_id)
            .cloned())
    }

    async fn get_by_seq_range(
        &self,
        conv_id: &str,
        anchor_seq: i64,
        direction: PullDirection,
        limit: i64,
        clear_seq: i64,
    ) -> CoreResult<Vec<Message>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<Message> = rows
            .iter()
            .filter(|m| m.conv_id == conv_id && m.seq > clear_seq)
            .filter(|m| match direction {
                PullDirection::Forward => m.seq > anchor_seq,
                PullDirection::Backward => m.seq < anchor_seq,
            })
            .cloned()
            .collect();

        match direction {
            PullDirection::Forward => matched.sort_by_key(|m| m.seq),
            PullDirection::Backward => matched.sort_by_key(|m| -m.seq),
        }
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn get_by_ids(&self, conv_id: &str, msg_ids: &[String]) -> CoreResult<Vec<Message>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<Message> = rows
            .iter()
            .filter(|m| m.conv_id == conv_id && msg_ids.contains(&m.msg_id))
            .cloned()
            .collect();
        matched.sort_by_key(|m| m.seq);
        Ok(matched)
    }

    async fn update_status(
        &self,
        conv_id: &str,
        msg_id: &str,
        status: MessageStatus,
        content: serde_json::Value,
    ) -> CoreResult<Message> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|m| m.conv_id == conv_id && m.msg_id == msg_id)
            .ok_or_else(|| CoreError::not_found(format!("message {msg_id}")))?;

        if row.status != status.as_i16() {
            row.status = status.as_i16();
            row.content = content;
            row.updated_at = Utc::now();
        }
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct MemSeqAllocator {
    counters: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl SeqAllocator for MemSeqAllocator {
    async fn allocate(&self, conv_id: &str) -> CoreResult<i64> {
        let mut counters = self.counters.lock().unwrap();
        let seq = counters.entry(conv_id.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}

#[derive(Default)]
pub struct MemIdempotencyIndex {
    entries: Mutex<HashMap<String, Message>>,
}

#[async_trait]
impl IdempotencyIndex for MemIdempotencyIndex {
    async fn lookup(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
    ) -> CoreResult<Option<Message>> {
        let key = format!("{from_uuid}:{device_id}:{client_msg_id}");
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    async fn record(
        &self,
        from_uuid: &str,
        device_id: &str,
        client_msg_id: &str,
        message: &Message,
    ) -> CoreResult<()> {
        let key = format!("{from_uuid}:{device_id}:{client_msg_id}");
        self.entries.lock().unwrap().insert(key, message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemConversationStore {
    rows: Mutex<Vec<Conversation>>,
    groups: Mutex<HashMap<String, GroupConversation>>,
    next_id: AtomicI64,
}

impl MemConversationStore {
    pub fn row(&self, owner_uuid: &str, conv_id: &str) -> Option<Conversation> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.owner_uuid == owner_uuid && c.conv_id == conv_id)
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn group_hot(&self, group_uuid: &str) -> Option<GroupConversation> {
        self.groups.lock().unwrap().get(group_uuid).cloned()
    }

    pub fn set_settings(&self, owner_uuid: &str, conv_id: &str, mute: bool, pin: bool) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows
            .iter_mut()
            .find(|c| c.owner_uuid == owner_uuid && c.conv_id == conv_id)
        {
            row.mute = mute;
            row.pin = pin;
        }
    }

    pub fn insert_raw(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        conv_type: ConvType,
        target_uuid: &str,
        max_seq: i64,
        read_seq: i64,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        self.rows.lock().unwrap().push(Conversation {
            id,
            conv_id: conv_id.to_string(),
            conv_type: conv_type.as_i16(),
            owner_uuid: owner_uuid.to_string(),
            target_uuid: target_uuid.to_string(),
            last_msg_id: None,
            last_msg_preview: None,
            last_msg_at: None,
            max_seq,
            read_seq,
            clear_seq: 0,
            unread_count: (max_seq - read_seq).max(0),
            mute: false,
            pin: false,
            status: CONV_STATUS_ACTIVE,
            created_at: now,
            updated_at: now,
        });
    }
}

#[async_trait]
impl ConversationStore for MemConversationStore {
    async fn get(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<Option<Conversation>> {
        Ok(self.row(owner_uuid, conv_id))
    }

    async fn list(
        &self,
        owner_uuid: &str,
        updated_since_ms: i64,
        cursor: Option<ListCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Conversation>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<Conversation> = rows
            .iter()
            .filter(|c| c.owner_uuid == owner_uuid)
            .filter(|c| {
                if updated_since_ms > 0 {
                    c.updated_at.timestamp_millis() > updated_since_ms
                } else {
                    c.status == CONV_STATUS_ACTIVE
                }
            })
            .filter(|c| match cursor {
                Some(cur) => {
                    let ms = c.updated_at.timestamp_millis();
                    ms < cur.updated_at_ms || (ms == cur.updated_at_ms && c.id < cur.id)
                }
                None => true,
            })
            .cloned()
            .collect();

        matched.sort_by_key(|c| (-c.updated_at.timestamp_millis(), -c.id));
        matched.truncate((limit + 1) as usize);
        Ok(matched)
    }

    async fn upsert_for_message(&self, row: NewConversation, is_sender: bool) -> CoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|c| c.owner_uuid == row.owner_uuid && c.conv_id == row.conv_id)
        {
            existing.max_seq = row.max_seq;
            existing.last_msg_id = row.last_msg_id;
            existing.last_msg_preview = row.last_msg_preview;
            existing.last_msg_at = row.last_msg_at;
            existing.status = CONV_STATUS_ACTIVE;
            existing.updated_at = row.updated_at;
            if is_sender {
                existing.read_seq = row.max_seq;
            } else {
                existing.unread_count += 1;
            }
        } else {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            rows.push(Conversation {
                id,
                conv_id: row.conv_id,
                conv_type: row.conv_type,
                owner_uuid: row.owner_uuid,
                target_uuid: row.target_uuid,
                last_msg_id: row.last_msg_id,
                last_msg_preview: row.last_msg_preview,
                last_msg_at: row.last_msg_at,
                max_seq: row.max_seq,
                read_seq: row.read_seq,
                clear_seq: row.clear_seq,
                unread_count: row.unread_count,
                mute: row.mute,
                pin: row.pin,
                status: row.status,
                created_at: row.updated_at,
                updated_at: row.updated_at,
            });
        }
        Ok(())
    }

    async fn update_read_seq(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        read_seq: i64,
    ) -> CoreResult<i64> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|c| c.owner_uuid == owner_uuid && c.conv_id == conv_id)
            .ok_or_else(|| CoreError::not_found(format!("conversation {conv_id}")))?;

        row.read_seq = row.read_seq.max(read_seq);
        row.unread_count = (row.max_seq - row.read_seq).max(0);
        Ok(row.unread_count)
    }

    async fn delete(&self, owner_uuid: &str, conv_id: &str) -> CoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|c| c.owner_uuid == owner_uuid && c.conv_id == conv_id)
            .ok_or_else(|| CoreError::not_found(format!("conversation {conv_id}")))?;

        row.status = CONV_STATUS_DELETED;
        row.clear_seq = row.max_seq;
        row.read_seq = row.max_seq;
        row.unread_count = 0;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update_settings(
        &self,
        owner_uuid: &str,
        conv_id: &str,
        mute: Option<bool>,
        pin: Option<bool>,
    ) -> CoreResult<()> {
        if mute.is_none() && pin.is_none() {
            return Ok(());
        }

        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|c| c.owner_uuid == owner_uuid && c.conv_id == conv_id)
            .ok_or_else(|| CoreError::not_found(format!("conversation {conv_id}")))?;

        if let Some(m) = mute {
            row.mute = m;
        }
        if let Some(p) = pin {
            row.pin = p;
        }
        Ok(())
    }

    async fn upsert_group_hot(&self, row: GroupConversation) -> CoreResult<()> {
        self.groups
            .lock()
            .unwrap()
            .insert(row.group_uuid.clone(), row);
        Ok(())
    }

    async fn batch_get_group_hot(
        &self,
        group_uuids: &[String],
    ) -> CoreResult<HashMap<String, GroupConversation>> {
        let groups = self.groups.lock().unwrap();
        Ok(group_uuids
            .iter()
            .filter_map(|id| groups.get(id).map(|gc| (id.clone(), gc.clone())))
            .collect())
    }
}

#[derive(Default)]
pub struct MemPublisher {
    events: Mutex<Vec<(String, PushEvent)>>,
    fail_next: AtomicBool,
}

impl MemPublisher {
    pub fn events(&self) -> Vec<(String, PushEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for MemPublisher {
    async fn publish(&self, conv_id: &str, event: &PushEvent) -> CoreResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::transient("broker unavailable"));
        }
        self.events
            .lock()
            .unwrap()
            .push((conv_id.to_string(), event.clone()));
        Ok(())
    }
}
