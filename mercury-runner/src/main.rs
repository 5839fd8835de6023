use anyhow::Result;
use mercury_api::{metrics as metrics_server, server, ApiState};
use mercury_core::metrics::Metrics;
use mercury_core::{Config, CoreContext};
use mercury_push::{
    router, ConnectionRegistry, DeviceActiveSyncer, PushRouter, RedisActiveStore,
    RedisDeviceDirectory, RedisGroupDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Mercury chat core");

    let config = Config::from_env();
    let ctx = CoreContext::new(config).await?;

    tracing::info!("Core context initialized");

    let metrics = Arc::new(Metrics::default());
    let registry = Arc::new(ConnectionRegistry::new(ctx.config.fanout.bucket_count));

    let active_store = Arc::new(RedisActiveStore::new(ctx.redis_pool.clone()));
    let syncer = DeviceActiveSyncer::start(&ctx.config.device_active, active_store, metrics.clone());

    let devices = Arc::new(RedisDeviceDirectory::new(
        ctx.redis_pool.clone(),
        ctx.config.device_active.online_window(),
    ));
    let groups = Arc::new(RedisGroupDirectory::new(ctx.redis_pool.clone()));
    let push_router = Arc::new(PushRouter::new(
        registry.clone(),
        devices,
        groups,
        metrics.clone(),
    ));

    // One signal stops the gateway listener and asks the consumer to drain.
    let (shutdown_tx, _shutdown_rx) = watch::channel(false);

    // Push consumer
    let consumer_task = {
        let ctx = ctx.clone();
        let push_router = push_router.clone();
        let stop_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = router::run(ctx, push_router, stop_rx).await {
                tracing::error!("Push consumer error: {}", e);
            }
        })
    };

    // Metrics listener
    let metrics_task = {
        let host = ctx.config.server.host.clone();
        let port = ctx.config.server.metrics_port;
        let registry = registry.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server::run(&host, port, registry, metrics).await {
                tracing::error!("Metrics server error: {}", e);
            }
        })
    };

    // Gateway in a background task so this task can sequence the drain.
    let state = ApiState::new(ctx.clone(), registry.clone(), syncer.clone(), metrics);
    let mut gateway_stop = shutdown_tx.subscribe();
    let mut server_task = tokio::spawn(server::run(state, async move {
        let _ = gateway_stop.changed().await;
    }));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        res = &mut server_task => {
            tracing::error!("Gateway exited before any shutdown signal");
            return res?;
        }
    }

    // Drain order: stop accepting connections and block new registrations,
    // let the consumer finish its in-flight event so fan-out still reaches
    // live queues, flush the last-seen buffer, and only then close every
    // client and the producer.
    tracing::info!("Draining for shutdown");
    let _ = shutdown_tx.send(true);
    registry.begin_shutdown();
    let _ = consumer_task.await;
    syncer.stop().await;
    registry.shutdown();
    if let Err(e) = server_task.await? {
        tracing::warn!("Gateway drain error: {}", e);
    }
    metrics_task.abort();
    if let Err(e) =
        mercury_core::kafka::flush_producer(&ctx.kafka_producer, Duration::from_secs(5))
    {
        tracing::warn!("Kafka producer flush failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
