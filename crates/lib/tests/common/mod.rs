//! Shared harness: serve the gateway router on an ephemeral port with an injectable store and clock.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use lib::clock::ManualClock;
use lib::config::Config;
use lib::gateway::{self, GatewayState};
use lib::message::{Message, MessageId};
use lib::pipeline::Pipeline;
use lib::store::{MemoryStore, MessageStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct TestGateway {
    pub base: String,
    pub ws: String,
    pub clock: Arc<ManualClock>,
    /// Broadcast to every open stream, as the shutdown signal does.
    pub events: broadcast::Sender<String>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Midday on a fixed date, far from the UTC day boundary.
pub fn test_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 12, 12, 0, 0).unwrap()
}

pub async fn spawn_gateway(config: Config, store: Arc<dyn MessageStore>) -> TestGateway {
    let clock = Arc::new(ManualClock::new(test_now()));
    let pipeline = Pipeline::new(store, &config.quota, config.store.timeout())
        .with_clock(clock.clone());
    let state = GatewayState::new(config, pipeline);
    let events = state.event_tx.clone();
    let app = gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestGateway {
        base: format!("http://{}", addr),
        ws: format!("ws://{}/ws", addr),
        clock,
        events,
        handle,
    }
}

/// Memory store whose inserts fail while `down` is set; counts keep working.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        self.check()?;
        self.inner.insert(message).await
    }

    async fn count_on(&self, label: &str, day: NaiveDate) -> Result<u64, StoreError> {
        self.inner.count_on(label, day).await
    }

    async fn insert_within_limit(
        &self,
        message: &Message,
        limit: u32,
    ) -> Result<Option<MessageId>, StoreError> {
        self.check()?;
        self.inner.insert_within_limit(message, limit).await
    }
}

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);
