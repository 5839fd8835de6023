use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// One live authenticated transport for one `(user, device)`.
///
/// The client owns the sending half of a bounded outbound queue; the gateway
/// owns the receiving half and drains it to the socket in a writer task.
/// Enqueue never blocks: a full queue is a drop, counted by the caller.
pub struct Client {
    user_uuid: String,
    device_id: String,
    connection_id: String,
    established_at: DateTime<Utc>,
    outbound: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
    close_notify: Notify,
    last_heartbeat: AtomicI64,
}

impl Client {
    /// Returns the client plus the queue's receiving half for the writer task.
    pub fn new(
        user_uuid: impl Into<String>,
        device_id: impl Into<String>,
        connection_id: impl Into<String>,
        queue_size: usize,
    ) -> (std::sync::Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let client = std::sync::Arc::new(Client {
            user_uuid: user_uuid.into(),
            device_id: device_id.into(),
            connection_id: connection_id.into(),
            established_at: Utc::now(),
            outbound: tx,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            last_heartbeat: AtomicI64::new(Utc::now().timestamp()),
        });
        (client, rx)
    }

    pub fn user_uuid(&self) -> &str {
        &self.user_uuid
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Non-blocking enqueue. `false` means dropped: the queue is full or the
    /// client is closed. Messages are durable, so the consumer just counts
    /// the drop and lets the device reconcile by seq range on reconnect.
    pub fn enqueue(&self, bytes: Vec<u8>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.outbound.try_send(bytes).is_ok()
    }

    /// Idempotent: the first call signals the writer task to stop draining
    /// and close the transport; later calls are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called. Safe against the close racing
    /// ahead of the wait.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    pub fn touch_heartbeat(&self) {
        self.last_heartbeat
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_heartbeat_unix(&self) -> i64 {
        self.last_heartbeat.load(Ordering::Relaxed)
    }
}
