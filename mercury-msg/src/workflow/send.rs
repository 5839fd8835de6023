use chrono::Utc;
use mercury_core::types::{ConvType, PushEvent, PushKind};
use mercury_core::CoreResult;
use std::sync::Arc;
use tracing;

use crate::conversation::service::ConversationService;
use crate::message::service::{CreateMessageRequest, MessageService};
use crate::producer::EventPublisher;

#[derive(Debug, Clone)]
pub struct SendMessageResponse {
    pub msg_id: String,
    pub seq: i64,
    pub conv_id: String,
    pub send_time: i64,
}

/// Send coordinator.
///
/// Only step 1 (persist) can fail the request. Conversation upserts and the
/// broker publish are best-effort: any later send re-derives conversation
/// state through expression updates, and a reconnecting client catches up by
/// seq range, so failures here are logged and dropped.
pub struct SendWorkflow {
    msg_service: Arc<MessageService>,
    conv_service: Arc<ConversationService>,
    publisher: Arc<dyn EventPublisher>,
}

impl SendWorkflow {
    pub fn new(
        msg_service: Arc<MessageService>,
        conv_service: Arc<ConversationService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            msg_service,
            conv_service,
            publisher,
        }
    }

    pub async fn execute(&self, req: &CreateMessageRequest) -> CoreResult<SendMessageResponse> {
        // Step 1: dedupe + seq + persist
        let result = self.msg_service.create_message(req).await?;
        let msg = &result.message;

        let response = SendMessageResponse {
            msg_id: msg.msg_id.clone(),
            seq: msg.seq,
            conv_id: msg.conv_id.clone(),
            send_time: msg.send_time.timestamp_millis(),
        };

        // Step 2: duplicate hit returns the first writer's result untouched;
        // conversation state and push already happened on the first pass.
        if result.was_duplicate {
            return Ok(response);
        }

        // Step 3: sender's own conversation row
        if let Err(e) = self
            .conv_service
            .upsert_for_message(&req.from_uuid, msg, req.conv_type, &req.target_uuid, true)
            .await
        {
            tracing::warn!("send: upsert sender conversation failed (non-fatal): {}", e);
        }

        // Step 4: receiver row (P2P write fan-out) or group hot-state
        match req.conv_type {
            ConvType::P2p => {
                if let Err(e) = self
                    .conv_service
                    .upsert_for_message(&req.target_uuid, msg, req.conv_type, &req.from_uuid, false)
                    .await
                {
                    tracing::warn!(
                        "send: upsert receiver conversation failed (non-fatal): {}",
                        e
                    );
                }
            }
            ConvType::Group => {
                if let Err(e) = self.conv_service.upsert_group_hot(msg).await {
                    tracing::warn!("send: upsert group hot-state failed (non-fatal): {}", e);
                }
            }
        }

        // Step 5: push event, keyed by conv_id for per-conversation ordering
        match serde_json::to_vec(msg) {
            Ok(data) => {
                let event = PushEvent {
                    kind: PushKind::MsgPush,
                    conv_type: req.conv_type,
                    receiver_uuid: req.target_uuid.clone(),
                    device_id: req.device_id.clone(),
                    from_uuid: req.from_uuid.clone(),
                    server_ts: Utc::now().timestamp_millis(),
                    data,
                };
                if let Err(e) = self.publisher.publish(&msg.conv_id, &event).await {
                    tracing::warn!("send: publish push event failed (non-fatal): {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("send: serialize push payload failed (non-fatal): {}", e);
            }
        }

        Ok(response)
    }
}
