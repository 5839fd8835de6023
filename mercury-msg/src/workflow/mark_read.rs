use chrono::Utc;
use mercury_core::types::{ConvType, MarkReadNotice, PushEvent, PushKind};
use mercury_core::CoreResult;
use std::sync::Arc;
use tracing;

use crate::conv_id;
use crate::conversation::service::ConversationService;
use crate::producer::EventPublisher;

/// Read coordinator: advance the cursor, then tell the owner's other devices
/// to clear their badges.
pub struct MarkReadWorkflow {
    conv_service: Arc<ConversationService>,
    publisher: Arc<dyn EventPublisher>,
}

impl MarkReadWorkflow {
    pub fn new(conv_service: Arc<ConversationService>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            conv_service,
            publisher,
        }
    }

    /// Returns the unread count after the cursor moved. `device_id` is the
    /// device that performed the read, excluded from the sync notice.
    pub async fn execute(
        &self,
        owner_uuid: &str,
        device_id: &str,
        conv_id: &str,
        read_seq: i64,
    ) -> CoreResult<i64> {
        let unread = self
            .conv_service
            .mark_read(owner_uuid, conv_id, read_seq)
            .await?;

        let notice = MarkReadNotice {
            conv_id: conv_id.to_string(),
            read_seq,
        };

        let conv_type = if conv_id::is_p2p(conv_id) {
            ConvType::P2p
        } else {
            ConvType::Group
        };

        match serde_json::to_vec(&notice) {
            Ok(data) => {
                let event = PushEvent {
                    kind: PushKind::MsgMarkRead,
                    conv_type,
                    receiver_uuid: owner_uuid.to_string(),
                    device_id: device_id.to_string(),
                    from_uuid: owner_uuid.to_string(),
                    server_ts: Utc::now().timestamp_millis(),
                    data,
                };
                // Other devices re-read the cursor on next open anyway.
                if let Err(e) = self.publisher.publish(conv_id, &event).await {
                    tracing::warn!("mark_read: publish failed (non-fatal): {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("mark_read: serialize notice failed (non-fatal): {}", e);
            }
        }

        Ok(unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::service::ConversationService;
    use crate::testutil::{text_message, MemConversationStore, MemPublisher};
    use mercury_core::CoreError;

    struct Fixture {
        workflow: MarkReadWorkflow,
        conv_store: Arc<MemConversationStore>,
        publisher: Arc<MemPublisher>,
    }

    fn fixture() -> Fixture {
        let conv_store = Arc::new(MemConversationStore::default());
        let publisher = Arc::new(MemPublisher::default());
        let conv_service = Arc::new(ConversationService::new(conv_store.clone()));

        Fixture {
            workflow: MarkReadWorkflow::new(conv_service, publisher.clone()),
            conv_store,
            publisher,
        }
    }

    #[tokio::test]
    async fn mark_read_publishes_sync_notice_to_self() {
        let f = fixture();
        let conv_service = ConversationService::new(f.conv_store.clone());
        for seq in 1..=5 {
            let msg = text_message("p2p-U1-U2", seq, "U1", "D1", "hi");
            conv_service
                .upsert_for_message("U2", &msg, ConvType::P2p, "U1", false)
                .await
                .unwrap();
        }

        let unread = f
            .workflow
            .execute("U2", "D2", "p2p-U1-U2", 5)
            .await
            .unwrap();
        assert_eq!(unread, 0);

        let events = f.publisher.events();
        assert_eq!(events.len(), 1);
        let (key, event) = &events[0];
        assert_eq!(key, "p2p-U1-U2");
        assert_eq!(event.kind, PushKind::MsgMarkRead);
        assert_eq!(event.receiver_uuid, "U2", "sync notice goes to self");
        assert_eq!(event.device_id, "D2", "originating device is excluded downstream");

        let notice: MarkReadNotice = serde_json::from_slice(&event.data).unwrap();
        assert_eq!(notice.read_seq, 5);
    }

    #[tokio::test]
    async fn stale_cursor_still_acks_with_current_unread() {
        let f = fixture();
        let conv_service = ConversationService::new(f.conv_store.clone());
        for seq in 1..=6 {
            let msg = text_message("p2p-U1-U2", seq, "U1", "D1", "hi");
            conv_service
                .upsert_for_message("U2", &msg, ConvType::P2p, "U1", false)
                .await
                .unwrap();
        }

        f.workflow.execute("U2", "D2", "p2p-U1-U2", 5).await.unwrap();
        let unread = f
            .workflow
            .execute("U2", "D3", "p2p-U1-U2", 3)
            .await
            .unwrap();

        assert_eq!(unread, 1, "stale cursor does not regress unread");
        assert_eq!(f.conv_store.row("U2", "p2p-U1-U2").unwrap().read_seq, 5);
    }

    #[tokio::test]
    async fn missing_conversation_surfaces_not_found() {
        let f = fixture();
        let err = f
            .workflow
            .execute("U2", "D2", "p2p-U1-U2", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(f.publisher.len(), 0);
    }
}
