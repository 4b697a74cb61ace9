//! In-memory message store.

use super::{MessageStore, StoreError};
use crate::message::{Message, MessageId, StoredMessage};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

struct Inner {
    next_id: MessageId,
    messages: Vec<StoredMessage>,
    closed: bool,
}

impl Inner {
    fn count(&self, label: &str, day: NaiveDate) -> u64 {
        self.messages
            .iter()
            .filter(|m| m.label == label && m.day() == day)
            .count() as u64
    }

    fn push(&mut self, message: &Message) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(StoredMessage::from_message(id, message));
        id
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Unavailable("store closed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Process-local store; ids start at 1.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                messages: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Copy of every stored message in insertion order.
    pub async fn snapshot(&self) -> Vec<StoredMessage> {
        self.inner.read().await.messages.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        let mut g = self.inner.write().await;
        g.check_open()?;
        Ok(g.push(message))
    }

    async fn count_on(&self, label: &str, day: NaiveDate) -> Result<u64, StoreError> {
        let g = self.inner.read().await;
        g.check_open()?;
        Ok(g.count(label, day))
    }

    async fn insert_within_limit(
        &self,
        message: &Message,
        limit: u32,
    ) -> Result<Option<MessageId>, StoreError> {
        let mut g = self.inner.write().await;
        g.check_open()?;
        if g.count(message.channel.label(), message.day()) >= u64::from(limit) {
            return Ok(None);
        }
        Ok(Some(g.push(message)))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.write().await.closed = true;
        Ok(())
    }
}
