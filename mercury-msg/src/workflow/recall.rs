use chrono::Utc;
use mercury_core::types::{ConvType, Message, PushEvent, PushKind, RecallNotice};
use mercury_core::CoreResult;
use std::sync::Arc;
use tracing;

use crate::conv_id;
use crate::message::service::MessageService;
use crate::producer::EventPublisher;

/// Recall coordinator: the domain service enforces authorization and the
/// recall window; this layer only derives routing and publishes the notice.
pub struct RecallWorkflow {
    msg_service: Arc<MessageService>,
    publisher: Arc<dyn EventPublisher>,
}

impl RecallWorkflow {
    pub fn new(msg_service: Arc<MessageService>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            msg_service,
            publisher,
        }
    }

    pub async fn execute(
        &self,
        conv_id: &str,
        msg_id: &str,
        operator_uuid: &str,
        operator_device: &str,
    ) -> CoreResult<Message> {
        // Step 1: permission + window check + status flip
        let message = self
            .msg_service
            .recall_message(conv_id, msg_id, operator_uuid)
            .await?;

        // Step 2: routing. The `p2p-` prefix is reserved for P2P conv ids;
        // anything else is a group id addressed verbatim.
        let (conv_type, receiver_uuid) = if conv_id::is_p2p(conv_id) {
            match conv_id::extract_peer_uuid(conv_id, operator_uuid) {
                Some(peer) => (ConvType::P2p, peer),
                None => {
                    tracing::warn!("recall: cannot derive peer from conv_id {}", conv_id);
                    return Ok(message);
                }
            }
        } else {
            (ConvType::Group, conv_id.to_string())
        };

        let notice = RecallNotice {
            conv_id: conv_id.to_string(),
            msg_id: msg_id.to_string(),
            operator: operator_uuid.to_string(),
            recall_time: Utc::now().timestamp_millis(),
        };

        match serde_json::to_vec(&notice) {
            Ok(data) => {
                let event = PushEvent {
                    kind: PushKind::MsgRecall,
                    conv_type,
                    receiver_uuid,
                    device_id: operator_device.to_string(),
                    from_uuid: operator_uuid.to_string(),
                    server_ts: Utc::now().timestamp_millis(),
                    data,
                };
                // The row is already flipped; clients also observe status=1
                // on their next pull, so a lost notice self-heals.
                if let Err(e) = self.publisher.publish(conv_id, &event).await {
                    tracing::warn!("recall: publish failed (non-fatal): {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("recall: serialize notice failed (non-fatal): {}", e);
            }
        }

        Ok(message)
    }
}
