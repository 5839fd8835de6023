use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::client::Client;

const DEFAULT_BUCKET_COUNT: usize = 32;

#[derive(Default)]
struct Bucket {
    by_user: RwLock<HashMap<String, HashMap<String, Arc<Client>>>>,
}

/// Sharded index of all live connections: `user_uuid -> device_id -> Client`.
///
/// Locks are only held for map surgery; enqueueing to a client's queue always
/// happens after the lock is released.
pub struct ConnectionRegistry {
    buckets: Vec<Bucket>,
    shutdown: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = if bucket_count == 0 {
            DEFAULT_BUCKET_COUNT
        } else {
            bucket_count
        };

        ConnectionRegistry {
            buckets: (0..bucket_count).map(|_| Bucket::default()).collect(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Insert a connection. Returns the previous client for the same
    /// `(user, device)` so the caller can close it; at any instant at most
    /// one client occupies the slot. Returns `None` without inserting once
    /// shutdown has started.
    pub fn register(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }

        let bucket = self.bucket_for(client.user_uuid());
        let mut by_user = bucket.by_user.write().unwrap();

        // Re-check under the lock so a concurrent shutdown drain cannot miss us.
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }

        let devices = by_user
            .entry(client.user_uuid().to_string())
            .or_default();
        let replaced = match devices.get(client.device_id()) {
            Some(old) if !Arc::ptr_eq(old, &client) => Some(old.clone()),
            _ => None,
        };
        devices.insert(client.device_id().to_string(), client);
        replaced
    }

    /// Remove a connection, but only if the stored entry is this exact
    /// client. A stale unregister from a replaced connection must not evict
    /// the replacement.
    pub fn unregister(&self, client: &Arc<Client>) {
        let bucket = self.bucket_for(client.user_uuid());
        let mut by_user = bucket.by_user.write().unwrap();

        if let Some(devices) = by_user.get_mut(client.user_uuid()) {
            if let Some(existing) = devices.get(client.device_id()) {
                if Arc::ptr_eq(existing, client) {
                    devices.remove(client.device_id());
                }
            }
            if devices.is_empty() {
                by_user.remove(client.user_uuid());
            }
        }
    }

    /// `false` when the device has no connection or its queue rejected the
    /// message.
    pub fn send_to_device(&self, user_uuid: &str, device_id: &str, bytes: &[u8]) -> bool {
        let bucket = self.bucket_for(user_uuid);
        let client = {
            let by_user = bucket.by_user.read().unwrap();
            by_user
                .get(user_uuid)
                .and_then(|devices| devices.get(device_id))
                .cloned()
        };

        match client {
            Some(client) => client.enqueue(bytes.to_vec()),
            None => false,
        }
    }

    /// Broadcast to every device of a user; returns the number of successful
    /// enqueues.
    pub fn send_to_user(&self, user_uuid: &str, bytes: &[u8]) -> usize {
        let bucket = self.bucket_for(user_uuid);
        let clients: Vec<Arc<Client>> = {
            let by_user = bucket.by_user.read().unwrap();
            match by_user.get(user_uuid) {
                Some(devices) => devices.values().cloned().collect(),
                None => return 0,
            }
        };

        clients
            .iter()
            .filter(|client| client.enqueue(bytes.to_vec()))
            .count()
    }

    pub fn count(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| {
                let by_user = bucket.by_user.read().unwrap();
                by_user.values().map(|devices| devices.len()).sum::<usize>()
            })
            .sum()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// First phase of shutdown: reject new registrations while existing
    /// connections stay alive, so the push consumer can drain its in-flight
    /// events into their queues.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Final phase, idempotent: blocks new registrations if `begin_shutdown`
    /// has not run yet, drains every bucket, then closes the drained clients
    /// outside the locks.
    pub fn shutdown(&self) {
        self.begin_shutdown();

        let mut clients = Vec::new();
        for bucket in &self.buckets {
            let mut by_user = bucket.by_user.write().unwrap();
            for (_, devices) in by_user.drain() {
                clients.extend(devices.into_values());
            }
        }

        for client in clients {
            client.close();
        }
    }

    fn bucket_for(&self, user_uuid: &str) -> &Bucket {
        if self.buckets.len() == 1 {
            return &self.buckets[0];
        }
        let mut hasher = DefaultHasher::new();
        user_uuid.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.buckets.len();
        &self.buckets[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(user: &str, device: &str) -> (Arc<Client>, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        Client::new(user, device, format!("{user}-{device}"), 8)
    }

    #[tokio::test]
    async fn register_returns_replaced_client() {
        let registry = ConnectionRegistry::new(4);
        let (old, _rx_old) = client("U1", "D1");
        let (new, _rx_new) = client("U1", "D1");

        assert!(registry.register(old.clone()).is_none());
        let replaced = registry.register(new.clone()).expect("old must be handed back");
        assert!(Arc::ptr_eq(&replaced, &old));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn stale_unregister_leaves_replacement_untouched() {
        let registry = ConnectionRegistry::new(4);
        let (old, _rx_old) = client("U1", "D1");
        let (new, _rx_new) = client("U1", "D1");

        registry.register(old.clone());
        registry.register(new.clone());

        // The dying old connection unregisters late
        registry.unregister(&old);
        assert_eq!(registry.count(), 1, "replacement must survive");
        assert!(registry.send_to_device("U1", "D1", b"x"));

        registry.unregister(&new);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn send_to_user_counts_successful_enqueues() {
        let registry = ConnectionRegistry::new(4);
        let (c1, mut rx1) = client("U1", "D1");
        let (c2, mut rx2) = client("U1", "D2");
        registry.register(c1);
        registry.register(c2);

        assert_eq!(registry.send_to_user("U1", b"hello"), 2);
        assert_eq!(rx1.recv().await.unwrap(), b"hello");
        assert_eq!(rx2.recv().await.unwrap(), b"hello");
        assert_eq!(registry.send_to_user("U2", b"hello"), 0);
    }

    #[tokio::test]
    async fn send_to_device_reports_full_queue_as_dropped() {
        let registry = ConnectionRegistry::new(4);
        let (c1, _rx) = Client::new("U1", "D1", "c1", 1);
        registry.register(c1);

        assert!(registry.send_to_device("U1", "D1", b"a"));
        assert!(!registry.send_to_device("U1", "D1", b"b"), "queue of 1 is full");
        assert!(!registry.send_to_device("U1", "D9", b"a"), "unknown device");
    }

    #[tokio::test]
    async fn begin_shutdown_blocks_registration_but_keeps_connections() {
        let registry = ConnectionRegistry::new(4);
        let (c1, mut rx1) = client("U1", "D1");
        registry.register(c1.clone());

        registry.begin_shutdown();

        let (c2, _rx2) = client("U2", "D1");
        assert!(registry.register(c2).is_none());
        assert_eq!(registry.count(), 1, "no new registrations");

        // Existing connections still deliver until the final phase
        assert!(!c1.is_closed());
        assert!(registry.send_to_device("U1", "D1", b"draining"));
        assert_eq!(rx1.recv().await.unwrap(), b"draining");

        registry.shutdown();
        assert!(c1.is_closed());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_clients_and_blocks_registration() {
        let registry = ConnectionRegistry::new(4);
        let (c1, _rx1) = client("U1", "D1");
        let (c2, _rx2) = client("U2", "D1");
        registry.register(c1.clone());
        registry.register(c2.clone());

        registry.shutdown();
        registry.shutdown(); // idempotent

        assert_eq!(registry.count(), 0);
        assert!(c1.is_closed());
        assert!(c2.is_closed());

        let (c3, _rx3) = client("U3", "D1");
        assert!(registry.register(c3).is_none());
        assert_eq!(registry.count(), 0, "register after shutdown must not insert");
    }

    #[tokio::test]
    async fn count_spans_buckets() {
        let registry = ConnectionRegistry::new(4);
        for i in 0..10 {
            let (c, _rx) = client(&format!("U{i}"), "D1");
            registry.register(c);
            // receivers dropped; enqueue would fail but registration stands
        }
        assert_eq!(registry.count(), 10);
    }
}
