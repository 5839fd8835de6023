use anyhow::{anyhow, Context, Result};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::config::{mask_url_credentials, DatabaseConfig};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    tracing::info!(
        "Connecting to Postgres at {}",
        mask_url_credentials(&config.url)
    );

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .context("build database pool")?;

    wait_for_database(&pool).await?;

    Ok(Arc::new(pool))
}

/// The pool hands out connections lazily, so probe one before declaring the
/// process up. Databases routinely come up after us in orchestrated
/// deployments; back off exponentially across a handful of attempts.
async fn wait_for_database(pool: &DbPool) -> Result<()> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match tokio::time::timeout(CONNECT_TIMEOUT, pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!("Database connection established");
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "Database attempt {}/{} failed: {}",
                    attempt,
                    CONNECT_ATTEMPTS,
                    e
                );
            }
            Err(_) => {
                tracing::warn!(
                    "Database attempt {}/{} timed out",
                    attempt,
                    CONNECT_ATTEMPTS
                );
            }
        }

        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
        }
    }

    Err(anyhow!(
        "database unreachable after {CONNECT_ATTEMPTS} attempts"
    ))
}
