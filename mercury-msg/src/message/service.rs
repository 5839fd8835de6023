use chrono::Utc;
use mercury_core::types::{ConvType, Message, MessageStatus, NewMessage};
use mercury_core::{ids, CoreError, CoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::conv_id;
use crate::idempotency::IdempotencyIndex;
use crate::message::repository::{MessageStore, PullDirection};
use crate::seq::SeqAllocator;

#[derive(Debug, Clone)]
pub struct CreateMessageRequest {
    pub from_uuid: String,
    pub device_id: String,
    pub client_msg_id: String,
    pub conv_type: ConvType,
    pub target_uuid: String,
    pub msg_type: i16,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CreateMessageResult {
    pub message: Message,
    pub was_duplicate: bool,
}

/// Pure message rules: conv-id derivation, seq allocation, persistence,
/// pulls, recall policy. Knows nothing about conversations or the broker.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    seq: Arc<dyn SeqAllocator>,
    idempotency: Arc<dyn IdempotencyIndex>,
    recall_window: Duration,
    max_pull_limit: i64,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        seq: Arc<dyn SeqAllocator>,
        idempotency: Arc<dyn IdempotencyIndex>,
        recall_window: Duration,
        max_pull_limit: i64,
    ) -> Self {
        Self {
            store,
            seq,
            idempotency,
            recall_window,
            max_pull_limit,
        }
    }

    pub async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> CoreResult<CreateMessageResult> {
        validate_create(req)?;

        let conv_id = match req.conv_type {
            ConvType::P2p => conv_id::p2p_conv_id(&req.from_uuid, &req.target_uuid),
            ConvType::Group => req.target_uuid.clone(),
        };

        // Fast-path dedupe. A cache miss is not authoritative: the insert
        // below still races against the sender-triple unique index.
        if let Some(cached) = self
            .idempotency
            .lookup(&req.from_uuid, &req.device_id, &req.client_msg_id)
            .await?
        {
            return Ok(CreateMessageResult {
                message: cached,
                was_duplicate: true,
            });
        }

        let seq = self.seq.allocate(&conv_id).await?;

        let row = NewMessage {
            conv_id,
            seq,
            msg_id: ids::new_msg_id(),
            client_msg_id: req.client_msg_id.clone(),
            from_uuid: req.from_uuid.clone(),
            device_id: req.device_id.clone(),
            msg_type: req.msg_type,
            content: req.content.clone(),
            status: MessageStatus::Normal.as_i16(),
            send_time: Utc::now(),
        };

        let message = match self.store.insert(row).await {
            Ok(stored) => stored,
            Err(err) if err.is_already_exists() => {
                // Lost the insert race: the allocated seq is abandoned and
                // the first writer's row is the result.
                let winner = self
                    .store
                    .get_by_sender_triple(&req.from_uuid, &req.device_id, &req.client_msg_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::internal("dedupe violation but winning row not found")
                    })?;
                return Ok(CreateMessageResult {
                    message: winner,
                    was_duplicate: true,
                });
            }
            Err(err) => return Err(err),
        };

        if let Err(e) = self
            .idempotency
            .record(&req.from_uuid, &req.device_id, &req.client_msg_id, &message)
            .await
        {
            tracing::warn!("Failed to record idempotency entry: {}", e);
        }

        Ok(CreateMessageResult {
            message,
            was_duplicate: false,
        })
    }

    pub async fn pull_messages(
        &self,
        conv_id: &str,
        anchor_seq: i64,
        direction: PullDirection,
        limit: i64,
        clear_seq: i64,
    ) -> CoreResult<Vec<Message>> {
        let limit = if limit <= 0 || limit > self.max_pull_limit {
            self.max_pull_limit
        } else {
            limit
        };
        self.store
            .get_by_seq_range(conv_id, anchor_seq, direction, limit, clear_seq)
            .await
    }

    pub async fn get_messages_by_ids(
        &self,
        conv_id: &str,
        msg_ids: &[String],
    ) -> CoreResult<Vec<Message>> {
        self.store.get_by_ids(conv_id, msg_ids).await
    }

    /// Flip a message to recalled. Only the sender may recall, only within
    /// the recall window; re-recalling an already-recalled message succeeds
    /// with the stored row.
    pub async fn recall_message(
        &self,
        conv_id: &str,
        msg_id: &str,
        operator_uuid: &str,
    ) -> CoreResult<Message> {
        let message = self
            .store
            .get_by_id(conv_id, msg_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("message {msg_id}")))?;

        if message.from_uuid != operator_uuid {
            return Err(CoreError::PermissionDenied(
                "only the sender may recall a message".to_string(),
            ));
        }

        if message.status == MessageStatus::Recalled.as_i16() {
            return Ok(message);
        }

        let age = Utc::now().signed_duration_since(message.send_time);
        if age.num_seconds() > self.recall_window.as_secs() as i64 {
            return Err(CoreError::FailedPrecondition(format!(
                "recall window of {}s exceeded",
                self.recall_window.as_secs()
            )));
        }

        let notice = serde_json::json!({
            "type": "recall",
            "operator": operator_uuid,
            "recall_time": Utc::now().timestamp_millis(),
        });

        self.store
            .update_status(conv_id, msg_id, MessageStatus::Recalled, notice)
            .await
    }
}

fn validate_create(req: &CreateMessageRequest) -> CoreResult<()> {
    if req.from_uuid.is_empty() {
        return Err(CoreError::invalid_argument("from_uuid is required"));
    }
    if req.device_id.is_empty() {
        return Err(CoreError::invalid_argument("device_id is required"));
    }
    if req.client_msg_id.is_empty() {
        return Err(CoreError::invalid_argument("client_msg_id is required"));
    }
    if req.target_uuid.is_empty() {
        return Err(CoreError::invalid_argument("target_uuid is required"));
    }
    if req.msg_type <= 0 {
        return Err(CoreError::invalid_argument("msg_type is required"));
    }
    Ok(())
}
