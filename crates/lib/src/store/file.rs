//! JSON-lines message file: one `StoredMessage` per line, appended and synced before an
//! insert is acknowledged. The whole file is indexed in memory on open.

use super::{MessageStore, StoreError};
use crate::message::{Message, MessageId, StoredMessage};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

struct Inner {
    /// `None` once closed.
    file: Option<File>,
    next_id: MessageId,
    /// (label, day) -> count
    buckets: HashMap<(String, NaiveDate), u64>,
    /// Fail the next append after its bytes reach the file.
    #[cfg(test)]
    fail_next_sync: bool,
}

pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open (or create) the message file and index existing lines.
    /// Lines that do not parse are skipped with a warning.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut next_id: MessageId = 1;
        let mut buckets = HashMap::new();
        let mut loaded = 0usize;
        for (n, line) in existing.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(line) {
                Ok(m) => {
                    next_id = next_id.max(m.id + 1);
                    *buckets.entry((m.label.clone(), m.day())).or_insert(0) += 1;
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("{}:{}: skipping unreadable message line: {}", path.display(), n + 1, e);
                }
            }
        }
        log::debug!("loaded {} message(s) from {}", loaded, path.display());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file: Some(file),
                next_id,
                buckets,
                #[cfg(test)]
                fail_next_sync: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. On any write error the file is cut back to its previous length so
    /// no fragment is left for the next line to land on; if that fails too the store closes.
    async fn append(inner: &mut Inner, message: &Message) -> Result<MessageId, StoreError> {
        let file = inner
            .file
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("store closed".to_string()))?;
        let id = inner.next_id;
        let stored = StoredMessage::from_message(id, message);
        let mut line = serde_json::to_string(&stored)
            .map_err(|e| StoreError::Constraint(format!("unserializable message: {}", e)))?;
        line.push('\n');

        let prev_len = file.metadata().await?.len();
        let written = write_line(file, line.as_bytes()).await;
        #[cfg(test)]
        let written = match written {
            Ok(()) if std::mem::take(&mut inner.fail_next_sync) => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sync failed",
            )),
            other => other,
        };
        if let Err(e) = written {
            match file.set_len(prev_len).await {
                Ok(()) => log::warn!("append of message {} failed, rolled back: {}", id, e),
                Err(te) => {
                    log::error!(
                        "append of message {} failed ({}) and rollback failed ({}); closing store",
                        id,
                        e,
                        te
                    );
                    inner.file = None;
                }
            }
            return Err(e.into());
        }

        inner.next_id += 1;
        *inner
            .buckets
            .entry((stored.label, message.day()))
            .or_insert(0) += 1;
        Ok(id)
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl MessageStore for FileStore {
    async fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        let mut g = self.inner.lock().await;
        Self::append(&mut g, message).await
    }

    async fn count_on(&self, label: &str, day: NaiveDate) -> Result<u64, StoreError> {
        let g = self.inner.lock().await;
        if g.file.is_none() {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }
        Ok(g
            .buckets
            .get(&(label.to_string(), day))
            .copied()
            .unwrap_or(0))
    }

    async fn insert_within_limit(
        &self,
        message: &Message,
        limit: u32,
    ) -> Result<Option<MessageId>, StoreError> {
        let mut g = self.inner.lock().await;
        if g.file.is_none() {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }
        let key = (message.channel.label().to_string(), message.day());
        if g.buckets.get(&key).copied().unwrap_or(0) >= u64::from(limit) {
            return Ok(None);
        }
        Self::append(&mut g, message).await.map(Some)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::fs::metadata(&self.path).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        if let Some(mut file) = g.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}
