//! Postgres-backed store over the `feedback` table (feature `postgres`).

use super::{day_bounds, MessageStore, StoreError};
use crate::message::{Message, MessageId};
use async_trait::async_trait;
use chrono::NaiveDate;
use postgres_store::sqlx;
use postgres_store::FeedbackTable;
use std::time::Duration;

pub struct PostgresStore {
    table: FeedbackTable,
}

impl PostgresStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let table = FeedbackTable::connect(database_url, max_connections, acquire_timeout)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { table })
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NoRows,
        sqlx::Error::Database(db) if db.constraint().is_some() => {
            StoreError::Constraint(db.message().to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        self.table
            .insert(&message.content, message.channel.label(), message.submitted_at)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_on(&self, label: &str, day: NaiveDate) -> Result<u64, StoreError> {
        let (from, to) = day_bounds(day);
        let n = self
            .table
            .count_between(label, from, to)
            .await
            .map_err(map_sqlx_error)?;
        Ok(n.max(0) as u64)
    }

    async fn insert_within_limit(
        &self,
        message: &Message,
        limit: u32,
    ) -> Result<Option<MessageId>, StoreError> {
        let label = message.channel.label();
        let day = message.day();
        let (from, to) = day_bounds(day);
        let lock_key = format!("feedback:{}:{}", label, day);
        self.table
            .insert_if_below(
                &message.content,
                label,
                message.submitted_at,
                from,
                to,
                i64::from(limit),
                &lock_key,
            )
            .await
            .map_err(map_sqlx_error)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.table.ping().await.map_err(map_sqlx_error)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.table.close().await;
        Ok(())
    }
}
