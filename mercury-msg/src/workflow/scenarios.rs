//! Cross-workflow flows as the gateway drives them: one shared set of
//! stores, multiple coordinators.

use mercury_core::types::{ConvType, MessageStatus, PushKind};
use std::sync::Arc;
use std::time::Duration;

use crate::conversation::service::ConversationService;
use crate::message::repository::PullDirection;
use crate::message::service::MessageService;
use crate::testutil::{
    text_request, MemConversationStore, MemIdempotencyIndex, MemMessageStore, MemPublisher,
    MemSeqAllocator,
};
use crate::workflow::mark_read::MarkReadWorkflow;
use crate::workflow::recall::RecallWorkflow;
use crate::workflow::send::SendWorkflow;

struct Harness {
    send: SendWorkflow,
    recall: RecallWorkflow,
    mark_read: MarkReadWorkflow,
    msg_service: Arc<MessageService>,
    conv_service: Arc<ConversationService>,
    msg_store: Arc<MemMessageStore>,
    conv_store: Arc<MemConversationStore>,
    publisher: Arc<MemPublisher>,
}

fn harness() -> Harness {
    let msg_store = Arc::new(MemMessageStore::default());
    let conv_store = Arc::new(MemConversationStore::default());
    let publisher = Arc::new(MemPublisher::default());

    let msg_service = Arc::new(MessageService::new(
        msg_store.clone(),
        Arc::new(MemSeqAllocator::default()),
        Arc::new(MemIdempotencyIndex::default()),
        Duration::from_secs(120),
        200,
    ));
    let conv_service = Arc::new(ConversationService::new(conv_store.clone()));

    Harness {
        send: SendWorkflow::new(msg_service.clone(), conv_service.clone(), publisher.clone()),
        recall: RecallWorkflow::new(msg_service.clone(), publisher.clone()),
        mark_read: MarkReadWorkflow::new(conv_service.clone(), publisher.clone()),
        msg_service,
        conv_service,
        msg_store,
        conv_store,
        publisher,
    }
}

#[tokio::test]
async fn send_then_recall_then_read_round_trip() {
    let h = harness();

    let resp = h
        .send
        .execute(&text_request("U1", "D1", "cmid-1", "U2", "hi"))
        .await
        .unwrap();
    assert_eq!(resp.conv_id, "p2p-U1-U2");

    let recalled = h
        .recall
        .execute(&resp.conv_id, &resp.msg_id, "U1", "D1")
        .await
        .unwrap();
    assert_eq!(recalled.status, MessageStatus::Recalled.as_i16());
    assert_eq!(
        h.msg_store.get(&resp.msg_id).unwrap().status,
        MessageStatus::Recalled.as_i16()
    );

    let unread = h
        .mark_read
        .execute("U2", "D2", &resp.conv_id, resp.seq)
        .await
        .unwrap();
    assert_eq!(unread, 0);

    let kinds: Vec<PushKind> = h.publisher.events().iter().map(|(_, e)| e.kind).collect();
    assert_eq!(
        kinds,
        vec![PushKind::MsgPush, PushKind::MsgRecall, PushKind::MsgMarkRead]
    );
    // All three events share the conversation partition key
    assert!(h
        .publisher
        .events()
        .iter()
        .all(|(key, _)| key == "p2p-U1-U2"));
}

#[tokio::test]
async fn recall_of_a_deduped_send_targets_the_first_message() {
    let h = harness();

    let req = text_request("U1", "D1", "cmid-1", "U2", "hi");
    let first = h.send.execute(&req).await.unwrap();
    let second = h.send.execute(&req).await.unwrap();
    assert_eq!(first.msg_id, second.msg_id);

    let recalled = h
        .recall
        .execute(&second.conv_id, &second.msg_id, "U1", "D1")
        .await
        .unwrap();
    assert_eq!(recalled.msg_id, first.msg_id);
    assert_eq!(h.msg_store.len(), 1);
}

#[tokio::test]
async fn group_send_then_listing_reconciles_hot_state() {
    let h = harness();

    // A member's stale per-owner row from some earlier activity
    h.conv_store.insert_raw("U2", "G1", ConvType::Group, "G1", 0, 0);

    let mut req = text_request("U1", "D1", "cmid-1", "G1", "group hello");
    req.conv_type = ConvType::Group;
    let resp = h.send.execute(&req).await.unwrap();
    assert_eq!(resp.seq, 1);

    // U2's row was never written by the group send (read fan-out), yet the
    // listing reports the group's authoritative position.
    let page = h.conv_service.list("U2", 0, "", 20).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].max_seq, 1);
    assert_eq!(page.items[0].unread_count, 1);
    assert_eq!(
        page.items[0].last_msg_id.as_deref(),
        Some(resp.msg_id.as_str())
    );
}

#[tokio::test]
async fn deleted_conversation_filters_history_through_clear_seq() {
    let h = harness();

    for i in 1..=3 {
        h.send
            .execute(&text_request("U1", "D1", &format!("cmid-{i}"), "U2", "old"))
            .await
            .unwrap();
    }

    h.conv_service.delete("U2", "p2p-U1-U2").await.unwrap();

    h.send
        .execute(&text_request("U1", "D1", "cmid-4", "U2", "new"))
        .await
        .unwrap();

    // The gateway pulls with the owner's clear marker, exactly as stored
    let clear_seq = h
        .conv_service
        .get("U2", "p2p-U1-U2")
        .await
        .unwrap()
        .unwrap()
        .clear_seq;
    assert_eq!(clear_seq, 3);

    let visible = h
        .msg_service
        .pull_messages("p2p-U1-U2", 0, PullDirection::Forward, 50, clear_seq)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1, "only the post-delete message is visible");
    assert_eq!(visible[0].seq, 4);
}
