//! Quota gate: at most `daily_limit` accepted messages per channel label per UTC day.

use crate::store::{with_deadline, MessageStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("quota check failed: {0}")]
pub struct QuotaError(#[from] pub StoreError);

pub struct QuotaGate {
    store: Arc<dyn MessageStore>,
    daily_limit: u32,
    timeout: Duration,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn MessageStore>, daily_limit: u32, timeout: Duration) -> Self {
        Self {
            store,
            daily_limit,
            timeout,
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// True iff fewer than `daily_limit` messages are stored for `label` on the UTC day of `now`.
    /// A "no rows" answer counts as zero; any other store failure is an error, never a yes or no.
    pub async fn allow(&self, label: &str, now: DateTime<Utc>) -> Result<bool, QuotaError> {
        let today = now.date_naive();
        let count = match with_deadline(self.timeout, self.store.count_on(label, today)).await {
            Ok(n) => n,
            Err(StoreError::NoRows) => 0,
            Err(e) => return Err(e.into()),
        };
        log::debug!(
            "quota: {} has {}/{} on {}",
            label,
            count,
            self.daily_limit,
            today
        );
        Ok(count < u64::from(self.daily_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Channel, Message, MessageId};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, s).unwrap()
    }

    /// Store whose count answers with a fixed error.
    struct CountFails(fn() -> StoreError);

    #[async_trait]
    impl MessageStore for CountFails {
        async fn insert(&self, _message: &Message) -> Result<MessageId, StoreError> {
            Ok(1)
        }
        async fn count_on(&self, _label: &str, _day: NaiveDate) -> Result<u64, StoreError> {
            Err((self.0)())
        }
        async fn insert_within_limit(
            &self,
            _message: &Message,
            _limit: u32,
        ) -> Result<Option<MessageId>, StoreError> {
            Ok(Some(1))
        }
    }

    #[tokio::test]
    async fn allows_until_limit() {
        let store = Arc::new(MemoryStore::new());
        let gate = QuotaGate::new(store.clone(), 2, Duration::from_secs(1));
        let label = Channel::Request.label();
        assert!(gate.allow(label, at(8, 0, 0)).await.unwrap());
        store
            .insert(&Message::new("a", Channel::Request, at(8, 0, 0)))
            .await
            .unwrap();
        assert!(gate.allow(label, at(8, 1, 0)).await.unwrap());
        store
            .insert(&Message::new("b", Channel::Request, at(8, 2, 0)))
            .await
            .unwrap();
        assert!(!gate.allow(label, at(23, 59, 59)).await.unwrap());
    }

    #[tokio::test]
    async fn new_utc_day_resets_bucket() {
        let store = Arc::new(MemoryStore::new());
        let gate = QuotaGate::new(store.clone(), 1, Duration::from_secs(1));
        store
            .insert(&Message::new("a", Channel::Stream, at(23, 59, 59)))
            .await
            .unwrap();
        let label = Channel::Stream.label();
        assert!(!gate.allow(label, at(23, 59, 59)).await.unwrap());
        let midnight = Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap();
        assert!(gate.allow(label, midnight).await.unwrap());
    }

    #[tokio::test]
    async fn no_rows_means_quota_available() {
        let gate = QuotaGate::new(
            Arc::new(CountFails(|| StoreError::NoRows)),
            2,
            Duration::from_secs(1),
        );
        assert!(gate.allow("test@friendy.me", at(1, 0, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn store_fault_is_an_error() {
        let gate = QuotaGate::new(
            Arc::new(CountFails(|| StoreError::Unavailable("down".to_string()))),
            2,
            Duration::from_secs(1),
        );
        let err = gate.allow("test@friendy.me", at(1, 0, 0)).await.unwrap_err();
        assert!(matches!(err.0, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn zero_limit_never_allows() {
        let gate = QuotaGate::new(Arc::new(MemoryStore::new()), 0, Duration::from_secs(1));
        assert!(!gate.allow("ws@friendy.me", at(12, 0, 0)).await.unwrap());
    }
}
