//! Message store: durable append-only record of accepted messages.
//!
//! The quota gate and ingestion pipeline see only the [`MessageStore`] trait; the backend
//! (memory, JSON-lines file, or Postgres) is chosen from config and opened once at startup.

mod file;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use crate::config::{self, Config, StoreBackend};
use crate::message::{Message, MessageId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query matched nothing. The quota gate reads this as a count of zero.
    #[error("no matching rows")]
    NoRows,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("store call exceeded {0:?}")]
    Timeout(Duration),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow persistence interface used by the quota gate and the pipeline.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message`; returns the assigned id.
    async fn insert(&self, message: &Message) -> Result<MessageId, StoreError>;

    /// Number of messages stored under `label` whose submission falls on UTC `day`.
    async fn count_on(&self, label: &str, day: NaiveDate) -> Result<u64, StoreError>;

    /// Persist `message` only if its (label, day) bucket holds fewer than `limit` messages,
    /// with the count and the write done as one step. `Ok(None)` means the bucket is full.
    async fn insert_within_limit(
        &self,
        message: &Message,
        limit: u32,
    ) -> Result<Option<MessageId>, StoreError>;

    /// Connectivity check run at startup.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Flush and release resources. Implementations holding a connection or file must fail
    /// later calls with `Unavailable`; the default does nothing.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Run a store call under a deadline; expiry becomes `StoreError::Timeout`.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// Half-open UTC range `[midnight, next midnight)` covering `day`.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

/// Open the configured backend and ping it. Failure aborts startup.
pub async fn open_store(config: &Config, config_path: &Path) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match config.store.backend {
        StoreBackend::Memory => {
            log::warn!("using in-memory message store; messages are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File => {
            let path = config::resolve_store_path(config, config_path);
            let store = FileStore::open(&path)
                .await
                .with_context(|| format!("opening message file {}", path.display()))?;
            log::info!("message store: {}", path.display());
            Arc::new(store)
        }
        StoreBackend::Postgres => open_postgres(config).await?,
    };
    with_deadline(config.store.timeout(), store.ping())
        .await
        .context("message store ping failed")?;
    Ok(store)
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &Config) -> Result<Arc<dyn MessageStore>> {
    let url = config::resolve_database_url(config).context(
        "store.backend is \"postgres\" but no database URL is set (store.databaseUrl or FRIENDY_DATABASE_URL)",
    )?;
    let store = PostgresStore::connect(&url, config.store.max_connections, config.store.timeout())
        .await
        .context("connecting to postgres")?;
    log::info!("message store: postgres");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &Config) -> Result<Arc<dyn MessageStore>> {
    anyhow::bail!("store.backend is \"postgres\" but this build lacks the `postgres` feature")
}
