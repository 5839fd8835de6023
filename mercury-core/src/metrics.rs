use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local counters surfaced by the metrics listener. Writers only
/// increment; readers snapshot.
#[derive(Debug, Default)]
pub struct Metrics {
    pub events_consumed: AtomicU64,
    pub consumer_errors: AtomicU64,
    pub push_delivered: AtomicU64,
    pub push_dropped: AtomicU64,
    pub device_active_flushed: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self, online_connections: usize) -> serde_json::Value {
        serde_json::json!({
            "online_connections": online_connections,
            "events_consumed": self.events_consumed.load(Ordering::Relaxed),
            "consumer_errors": self.consumer_errors.load(Ordering::Relaxed),
            "push_delivered": self.push_delivered.load(Ordering::Relaxed),
            "push_dropped": self.push_dropped.load(Ordering::Relaxed),
            "device_active_flushed": self.device_active_flushed.load(Ordering::Relaxed),
        })
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
