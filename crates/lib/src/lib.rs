//! Friendy core library: feedback ingestion shared by the CLI and its tests.
//!
//! Messages arrive over HTTP (`POST /test`) or WebSocket (`GET /ws`), pass a per-channel daily
//! quota, and are appended to a message store. See [`pipeline`] for the gate-then-persist flow.

pub mod clock;
pub mod config;
pub mod gateway;
pub mod init;
pub mod message;
pub mod pipeline;
pub mod quota;
pub mod store;
