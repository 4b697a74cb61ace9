//! Gateway: HTTP + WebSocket front ends for the ingestion pipeline.
//!
//! Single port serves `GET /health`, `POST /test` (one message per request) and `GET /ws`
//! (one message per frame, accepted frames echoed back).

mod error;
mod protocol;
mod server;
mod stream;

pub use error::AppError;
pub use protocol::{StreamNotice, SubmitResponse};
pub use server::{build_router, run_gateway, GatewayState, SHUTDOWN_EVENT_JSON};
