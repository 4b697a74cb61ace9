//! Ingestion pipeline: decode → quota check → persist → outcome.
//!
//! Shared by both channel adapters. Nothing is retried: one store failure is the final
//! outcome for that message. Errors never leave this module as panics or process exits;
//! every path ends in an [`Outcome`].

use crate::clock::{Clock, SystemClock};
use crate::config::{QuotaConfig, QuotaMode};
use crate::message::{self, Channel, DecodeError, Message, MessageId};
use crate::quota::{QuotaError, QuotaGate};
use crate::store::{with_deadline, MessageStore, StoreError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Why a well-formed message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DailyLimitReached,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DailyLimitReached => f.write_str("daily limit reached"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("persist failed: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// The underlying store failure, if this was one (from the quota check or the write).
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            IngestError::Decode(_) => None,
            IngestError::Quota(q) => Some(&q.0),
            IngestError::Store(s) => Some(s),
        }
    }
}

/// Result of running one message through the pipeline.
#[derive(Debug)]
pub enum Outcome {
    Accepted(MessageId),
    Rejected(RejectReason),
    Failed(IngestError),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}

pub struct Pipeline {
    store: Arc<dyn MessageStore>,
    gate: QuotaGate,
    mode: QuotaMode,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn MessageStore>, quota: &QuotaConfig, timeout: Duration) -> Self {
        Self {
            gate: QuotaGate::new(store.clone(), quota.daily_limit, timeout),
            store,
            mode: quota.mode,
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock (tests, replays).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Decode `raw` for `channel` and run it through the gate and the store.
    pub async fn ingest(&self, raw: &[u8], channel: Channel) -> Outcome {
        match message::decode(channel, raw) {
            Ok(content) => self.ingest_content(content, channel).await,
            Err(e) => {
                log::debug!("ingest[{}]: decode failed: {}", channel.label(), e);
                Outcome::Failed(e.into())
            }
        }
    }

    /// Run already-decoded content through the gate and the store.
    pub async fn ingest_content(&self, content: String, channel: Channel) -> Outcome {
        let message = Message::new(content, channel, self.clock.now());
        let outcome = match self.mode {
            QuotaMode::CheckThenWrite => self.check_then_write(&message).await,
            QuotaMode::Atomic => self.write_within_limit(&message).await,
        };
        match &outcome {
            Outcome::Accepted(id) => {
                log::info!("ingest[{}]: accepted message {}", channel.label(), id)
            }
            Outcome::Rejected(reason) => {
                log::info!("ingest[{}]: rejected: {}", channel.label(), reason)
            }
            Outcome::Failed(e) => log::warn!("ingest[{}]: failed: {}", channel.label(), e),
        }
        outcome
    }

    /// Two separate store calls. Concurrent callers on one bucket may all pass the check.
    async fn check_then_write(&self, message: &Message) -> Outcome {
        match self
            .gate
            .allow(message.channel.label(), message.submitted_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Outcome::Rejected(RejectReason::DailyLimitReached),
            Err(e) => return Outcome::Failed(e.into()),
        }
        match with_deadline(self.timeout, self.store.insert(message)).await {
            Ok(id) => Outcome::Accepted(id),
            Err(e) => Outcome::Failed(e.into()),
        }
    }

    async fn write_within_limit(&self, message: &Message) -> Outcome {
        let limit = self.gate.daily_limit();
        match with_deadline(self.timeout, self.store.insert_within_limit(message, limit)).await {
            Ok(Some(id)) => Outcome::Accepted(id),
            Ok(None) => Outcome::Rejected(RejectReason::DailyLimitReached),
            Err(e) => Outcome::Failed(e.into()),
        }
    }
}
