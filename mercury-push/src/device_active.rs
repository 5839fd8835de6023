use async_trait::async_trait;
use chrono::Utc;
use mercury_core::config::DeviceActiveConfig;
use mercury_core::metrics::Metrics;
use mercury_core::redis::get_connection;
use mercury_core::{CoreResult, RedisPool};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing;

/// Hash key holding a user's device last-seen map, device_id -> unix seconds.
pub(crate) fn active_key(user_uuid: &str) -> String {
    format!("user:devices:active:{user_uuid}")
}

const ACTIVE_TTL_SECS: i64 = 45 * 24 * 60 * 60;
const BATCH_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveItem {
    pub user_uuid: String,
    pub device_id: String,
    pub unix_sec: i64,
}

/// Sink for drained last-seen batches.
#[async_trait]
pub trait ActiveStore: Send + Sync {
    async fn write_batch(&self, items: &[ActiveItem]) -> CoreResult<()>;
}

pub struct RedisActiveStore {
    redis_pool: RedisPool,
}

impl RedisActiveStore {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }
}

#[async_trait]
impl ActiveStore for RedisActiveStore {
    async fn write_batch(&self, items: &[ActiveItem]) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut conn = get_connection(&self.redis_pool).await?;
        let mut pipe = redis::pipe();
        for item in items {
            let key = active_key(&item.user_uuid);
            pipe.cmd("HSET")
                .arg(&key)
                .arg(&item.device_id)
                .arg(item.unix_sec)
                .ignore();
            pipe.cmd("EXPIRE").arg(&key).arg(ACTIVE_TTL_SECS).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

type Key = (String, String);

/// Two-level write-back of device last-seen timestamps.
///
/// The throttle shards decide whether a touch is worth recording at all; the
/// coalescing buffer keeps the newest timestamp per `(user, device)` until
/// the flush loop hands a drained batch to the worker pool. Failed or
/// overflowing batches merge back into the buffer, never dropping a key, and
/// a merge never overwrites a newer timestamp with an older one.
pub struct DeviceActiveSyncer {
    shards: Vec<Mutex<HashMap<Key, i64>>>,
    pending: Mutex<HashMap<Key, ActiveItem>>,
    update_interval_secs: i64,
    batch_tx: Mutex<Option<mpsc::Sender<Vec<ActiveItem>>>>,
    stop_tx: watch::Sender<bool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceActiveSyncer {
    pub fn start(
        cfg: &DeviceActiveConfig,
        store: Arc<dyn ActiveStore>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::channel(cfg.queue_size.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let syncer = Arc::new(DeviceActiveSyncer {
            shards: (0..cfg.shard_count.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            pending: Mutex::new(HashMap::new()),
            update_interval_secs: cfg.update_interval_secs as i64,
            batch_tx: Mutex::new(Some(batch_tx)),
            stop_tx,
            flush_handle: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
        });

        let flush_handle = tokio::spawn(Self::flush_loop(
            syncer.clone(),
            cfg.flush_interval(),
            stop_rx,
        ));
        *syncer.flush_handle.lock().unwrap() = Some(flush_handle);

        let batch_rx = Arc::new(tokio::sync::Mutex::new(batch_rx));
        let mut workers = Vec::with_capacity(cfg.worker_count.max(1));
        for _ in 0..cfg.worker_count.max(1) {
            workers.push(tokio::spawn(Self::worker_loop(
                syncer.clone(),
                batch_rx.clone(),
                store.clone(),
                metrics.clone(),
            )));
        }
        *syncer.worker_handles.lock().unwrap() = workers;

        syncer
    }

    /// Record activity for `(user, device)`. Returns `false` when a recent
    /// enough touch already exists; `true` means the timestamp entered the
    /// buffer and exactly one eventual flush will carry a value >= it.
    pub fn touch(&self, user_uuid: &str, device_id: &str) -> bool {
        if user_uuid.is_empty() || device_id.is_empty() {
            return false;
        }

        let key: Key = (user_uuid.to_string(), device_id.to_string());
        let now = Utc::now().timestamp();

        {
            let mut shard = self.shard_for(&key).lock().unwrap();
            if let Some(last) = shard.get(&key) {
                if now - last < self.update_interval_secs {
                    return false;
                }
            }
            shard.insert(key.clone(), now);
        }

        let item = ActiveItem {
            user_uuid: key.0.clone(),
            device_id: key.1.clone(),
            unix_sec: now,
        };
        self.pending.lock().unwrap().insert(key, item);
        true
    }

    /// Purge a key from both levels, e.g. when the device logs out.
    pub fn delete(&self, user_uuid: &str, device_id: &str) {
        let key: Key = (user_uuid.to_string(), device_id.to_string());
        self.shard_for(&key).lock().unwrap().remove(&key);
        self.pending.lock().unwrap().remove(&key);
    }

    /// One final flush, close the worker channel, join everything.
    pub async fn stop(&self) {
        if self.stop_tx.send(true).is_err() {
            return;
        }

        let flush_handle = self.flush_handle.lock().unwrap().take();
        if let Some(handle) = flush_handle {
            let _ = handle.await;
        }

        // Dropping the sender closes the channel; workers drain what is left.
        self.batch_tx.lock().unwrap().take();

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
    }

    async fn flush_loop(syncer: Arc<Self>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    syncer.flush_once();
                }
                _ = stop_rx.changed() => {
                    syncer.flush_once();
                    return;
                }
            }
        }
    }

    async fn worker_loop(
        syncer: Arc<Self>,
        batch_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<ActiveItem>>>>,
        store: Arc<dyn ActiveStore>,
        metrics: Arc<Metrics>,
    ) {
        loop {
            let batch = { batch_rx.lock().await.recv().await };
            let Some(batch) = batch else {
                return;
            };
            if batch.is_empty() {
                continue;
            }

            match tokio::time::timeout(BATCH_DEADLINE, store.write_batch(&batch)).await {
                Ok(Ok(())) => {
                    Metrics::add(&metrics.device_active_flushed, batch.len() as u64);
                }
                Ok(Err(e)) => {
                    tracing::warn!("device-active batch write failed, re-buffering: {}", e);
                    syncer.merge_pending(batch);
                }
                Err(_) => {
                    tracing::warn!("device-active batch write timed out, re-buffering");
                    syncer.merge_pending(batch);
                }
            }
        }
    }

    fn flush_once(&self) {
        let drained: Vec<ActiveItem> = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending).into_values().collect()
        };

        let sender = self.batch_tx.lock().unwrap().clone();
        let Some(sender) = sender else {
            self.merge_pending(drained);
            return;
        };

        // A full worker channel is back-pressure, not data loss.
        if let Err(err) = sender.try_send(drained) {
            let batch = match err {
                mpsc::error::TrySendError::Full(batch) => batch,
                mpsc::error::TrySendError::Closed(batch) => batch,
            };
            self.merge_pending(batch);
        }
    }

    /// Re-inject items, keeping the newest timestamp per key so a retry can
    /// never roll a device's last-seen backwards.
    fn merge_pending(&self, items: Vec<ActiveItem>) {
        if items.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        for item in items {
            let key: Key = (item.user_uuid.clone(), item.device_id.clone());
            match pending.get(&key) {
                Some(existing) if existing.unix_sec >= item.unix_sec => {}
                _ => {
                    pending.insert(key, item);
                }
            }
        }
    }

    fn shard_for(&self, key: &Key) -> &Mutex<HashMap<Key, i64>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    #[cfg(test)]
    fn pending_snapshot(&self) -> Vec<ActiveItem> {
        self.pending.lock().unwrap().values().cloned().collect()
    }
}
