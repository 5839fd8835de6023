use anyhow::Result;
use mercury_core::metrics::Metrics;
use mercury_core::types::{ConvType, PushEvent, PushKind};
use mercury_core::{CoreContext, CoreResult};
use rdkafka::consumer::Consumer;
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing;

use crate::directory::{DeviceDirectory, GroupDirectory};
use crate::registry::ConnectionRegistry;

/// Fan-out router for the `msg.push` topic.
///
/// Partitioning by conv_id means each conversation's events arrive here in
/// publish order, and each `(user, device)` queue preserves that order.
pub struct PushRouter {
    registry: Arc<ConnectionRegistry>,
    devices: Arc<dyn DeviceDirectory>,
    groups: Arc<dyn GroupDirectory>,
    metrics: Arc<Metrics>,
}

impl PushRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        devices: Arc<dyn DeviceDirectory>,
        groups: Arc<dyn GroupDirectory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            devices,
            groups,
            metrics,
        }
    }

    /// Deliver one serialized push event to every resolved online device,
    /// forwarding the payload bytes verbatim. Returns (delivered, dropped).
    pub async fn handle_event(&self, payload: &[u8]) -> CoreResult<(usize, usize)> {
        let event: PushEvent = serde_json::from_slice(payload)?;

        let users = self.recipient_users(&event).await?;

        let mut delivered = 0usize;
        let mut dropped = 0usize;
        for user in users {
            let online = self.devices.online_devices(&user).await?;
            for device in online {
                if excluded(&event, &user, &device) {
                    continue;
                }
                if self.registry.send_to_device(&user, &device, payload) {
                    delivered += 1;
                } else {
                    dropped += 1;
                }
            }
        }

        Metrics::add(&self.metrics.push_delivered, delivered as u64);
        Metrics::add(&self.metrics.push_dropped, dropped as u64);
        Ok((delivered, dropped))
    }

    /// Which users receive this event. Device-level exclusion happens later.
    async fn recipient_users(&self, event: &PushEvent) -> CoreResult<Vec<String>> {
        match event.kind {
            PushKind::MsgPush | PushKind::MsgRecall => match event.conv_type {
                // Peer gets it on every device; the sender's other devices
                // get a self-echo.
                ConvType::P2p => Ok(dedup(vec![
                    event.receiver_uuid.clone(),
                    event.from_uuid.clone(),
                ])),
                ConvType::Group => self.groups.members(&event.receiver_uuid).await,
            },
            // Cursor sync only concerns the owner's other devices.
            PushKind::MsgMarkRead => Ok(vec![event.receiver_uuid.clone()]),
        }
    }
}

/// The originating device never receives its own event.
fn excluded(event: &PushEvent, user: &str, device: &str) -> bool {
    user == event.from_uuid && device == event.device_id
}

fn dedup(mut users: Vec<String>) -> Vec<String> {
    users.sort();
    users.dedup();
    users
}

/// Consume `msg.push` and fan out until `stop_rx` fires. The event being
/// handled when the signal arrives is fanned out completely before the loop
/// exits, so the shutdown drain never abandons an in-flight batch.
pub async fn run(
    ctx: CoreContext,
    router: Arc<PushRouter>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("Starting push consumer");

    let consumer = ctx.create_consumer(None)?;
    let topic = ctx.config.kafka.push_topic.clone();
    consumer.subscribe(&[topic.as_str()])?;

    tracing::info!("Subscribed to topic: {}", topic);

    let mut error_count = 0u32;
    let mut last_error_log = std::time::Instant::now();

    loop {
        let received = tokio::select! {
            _ = stop_rx.changed() => {
                tracing::info!("Push consumer stopping, in-flight event drained");
                return Ok(());
            }
            received = consumer.recv() => received,
        };

        match received {
            Ok(record) => {
                error_count = 0;
                if let Some(payload) = record.payload() {
                    Metrics::incr(&router.metrics.events_consumed);
                    match router.handle_event(payload).await {
                        Ok((delivered, dropped)) => {
                            tracing::debug!(
                                "Push event fanned out: delivered={} dropped={}",
                                delivered,
                                dropped
                            );
                        }
                        Err(e) => {
                            Metrics::incr(&router.metrics.consumer_errors);
                            tracing::error!("Error handling push event: {}", e);
                        }
                    }
                }
            }
            Err(e) => {
                error_count += 1;
                Metrics::incr(&router.metrics.consumer_errors);
                // Only log errors every 30 seconds to reduce log spam
                if last_error_log.elapsed().as_secs() >= 30 {
                    tracing::warn!(
                        "Error receiving from Kafka (error count: {}): {}",
                        error_count,
                        e
                    );
                    last_error_log = std::time::Instant::now();
                }
                // Exponential backoff: 1s, 2s, 4s, max 30s
                let backoff =
                    Duration::from_secs(1 << error_count.min(5)).min(Duration::from_secs(30));
                tokio::select! {
                    _ = stop_rx.changed() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemDeviceDirectory {
        devices: Mutex<HashMap<String, Vec<String>>>,
    }

    impl MemDeviceDirectory {
        fn set(&self, user: &str, devices: &[&str]) {
            self.devices.lock().unwrap().insert(
                user.to_string(),
                devices.iter().map(|d| d.to_string()).collect(),
            );
        }
    }

    #[async_trait]
    impl DeviceDirectory for MemDeviceDirectory {
        async fn online_devices(&self, user_uuid: &str) -> CoreResult<Vec<String>> {
            Ok(self
                .devices
                .lock()
                .unwrap()
                .get(user_uuid)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemGroupDirectory {
        members: Mutex<HashMap<String, Vec<String>>>,
    }

    impl MemGroupDirectory {
        fn set(&self, group: &str, members: &[&str]) {
            self.members.lock().unwrap().insert(
                group.to_string(),
                members.iter().map(|m| m.to_string()).collect(),
            );
        }
    }

    #[async_trait]
    impl GroupDirectory for MemGroupDirectory {
        async fn members(&self, group_uuid: &str) -> CoreResult<Vec<String>> {
            Ok(self
                .members
                .lock()
                .unwrap()
                .get(group_uuid)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct Fixture {
        router: PushRouter,
        registry: Arc<ConnectionRegistry>,
        devices: Arc<MemDeviceDirectory>,
        groups: Arc<MemGroupDirectory>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let devices = Arc::new(MemDeviceDirectory::default());
        let groups = Arc::new(MemGroupDirectory::default());
        let router = PushRouter::new(
            registry.clone(),
            devices.clone(),
            groups.clone(),
            Arc::new(Metrics::default()),
        );
        Fixture {
            router,
            registry,
            devices,
            groups,
        }
    }

    fn connect(
        f: &Fixture,
        user: &str,
        device: &str,
    ) -> tokio::sync::mpsc::Receiver<Vec<u8>> {
        let (client, rx) = Client::new(user, device, format!("{user}-{device}"), 16);
        f.registry.register(client);
        rx
    }

    fn push_event(kind: PushKind, conv_type: ConvType, receiver: &str, from: &str, device: &str) -> Vec<u8> {
        let event = PushEvent {
            kind,
            conv_type,
            receiver_uuid: receiver.to_string(),
            device_id: device.to_string(),
            from_uuid: from.to_string(),
            server_ts: 1_700_000_000_000,
            data: b"{\"seq\":1,\"from_uuid\":\"U1\"}".to_vec(),
        };
        serde_json::to_vec(&event).unwrap()
    }

    #[tokio::test]
    async fn p2p_push_reaches_peer_and_senders_other_devices() {
        let f = fixture();
        let mut rx_u2_d2 = connect(&f, "U2", "D2");
        let mut rx_u1_d1 = connect(&f, "U1", "D1");
        let mut rx_u1_d3 = connect(&f, "U1", "D3");
        f.devices.set("U1", &["D1", "D3"]);
        f.devices.set("U2", &["D2"]);

        let payload = push_event(PushKind::MsgPush, ConvType::P2p, "U2", "U1", "D1");
        let (delivered, dropped) = f.router.handle_event(&payload).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(dropped, 0);

        assert_eq!(rx_u2_d2.try_recv().unwrap(), payload, "peer receives the event");
        assert_eq!(rx_u1_d3.try_recv().unwrap(), payload, "self multi-device echo");
        assert!(
            rx_u1_d1.try_recv().is_err(),
            "originating device receives nothing"
        );
    }

    #[tokio::test]
    async fn group_push_applies_multi_device_rule_per_member() {
        let f = fixture();
        let mut rx_u1_d1 = connect(&f, "U1", "D1");
        let mut rx_u1_d2 = connect(&f, "U1", "D2");
        let mut rx_u2_d1 = connect(&f, "U2", "D1");
        let mut rx_u3_d1 = connect(&f, "U3", "D1");
        f.devices.set("U1", &["D1", "D2"]);
        f.devices.set("U2", &["D1"]);
        f.devices.set("U3", &["D1"]);
        f.groups.set("G1", &["U1", "U2", "U3"]);

        let payload = push_event(PushKind::MsgPush, ConvType::Group, "G1", "U1", "D1");
        let (delivered, _) = f.router.handle_event(&payload).await.unwrap();
        assert_eq!(delivered, 3);

        assert!(rx_u1_d1.try_recv().is_err(), "sender's originating device excluded");
        assert!(rx_u1_d2.try_recv().is_ok(), "sender's other device echoed");
        // Same device id on a different user is NOT excluded
        assert!(rx_u2_d1.try_recv().is_ok());
        assert!(rx_u3_d1.try_recv().is_ok());
    }

    #[tokio::test]
    async fn recall_uses_push_recipient_rules() {
        let f = fixture();
        let mut rx_u2_d2 = connect(&f, "U2", "D2");
        let mut rx_u1_d1 = connect(&f, "U1", "D1");
        f.devices.set("U1", &["D1"]);
        f.devices.set("U2", &["D2"]);

        let payload = push_event(PushKind::MsgRecall, ConvType::P2p, "U2", "U1", "D1");
        f.router.handle_event(&payload).await.unwrap();

        assert!(rx_u2_d2.try_recv().is_ok());
        assert!(rx_u1_d1.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_read_syncs_only_other_own_devices() {
        let f = fixture();
        let mut rx_u2_d2 = connect(&f, "U2", "D2");
        let mut rx_u2_d3 = connect(&f, "U2", "D3");
        let mut rx_u1_d1 = connect(&f, "U1", "D1");
        f.devices.set("U2", &["D2", "D3"]);
        f.devices.set("U1", &["D1"]);

        let payload = push_event(PushKind::MsgMarkRead, ConvType::P2p, "U2", "U2", "D2");
        let (delivered, _) = f.router.handle_event(&payload).await.unwrap();
        assert_eq!(delivered, 1);

        assert!(rx_u2_d2.try_recv().is_err(), "reading device excluded");
        assert!(rx_u2_d3.try_recv().is_ok(), "other device gets the cursor");
        assert!(rx_u1_d1.try_recv().is_err(), "peer is not involved");
    }

    #[tokio::test]
    async fn offline_devices_are_skipped_and_full_queues_count_as_dropped() {
        let f = fixture();
        // U2/D2 online per directory but has no live connection
        f.devices.set("U2", &["D2"]);
        f.devices.set("U1", &[]);

        let payload = push_event(PushKind::MsgPush, ConvType::P2p, "U2", "U1", "D1");
        let (delivered, dropped) = f.router.handle_event(&payload).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(dropped, 1, "directory hit without a connection is a drop");
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let f = fixture();
        assert!(f.router.handle_event(b"not json").await.is_err());
    }
}
