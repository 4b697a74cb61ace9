//! Gateway HTTP + WebSocket server (single port).

use super::error::AppError;
use super::protocol::SubmitResponse;
use super::stream;
use crate::config::{Config, CorsConfig};
use crate::message::Channel;
use crate::pipeline::{Outcome, Pipeline};
use crate::store::{self, MessageStore};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderName, HeaderValue, Method},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Fixed liveness body.
const HEALTH_BODY: &str = "Bloop";

/// Sent to every open stream on shutdown; the stream loop closes after forwarding it.
pub const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown"}"#;

/// Shared state for the gateway (config, pipeline, shutdown broadcast).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    /// Broadcasts events to connected stream clients (e.g. shutdown).
    pub event_tx: broadcast::Sender<String>,
}

impl GatewayState {
    pub fn new(config: Config, pipeline: Pipeline) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            event_tx,
        }
    }
}

/// Router with all routes and the CORS layer. Public so tests can serve it on any listener.
pub fn build_router(state: GatewayState) -> Router {
    let cors = cors_layer(&state.config.cors);
    Router::new()
        .route("/health", get(health_http))
        .route("/test", post(submit_http))
        .route("/submit", post(submit_http))
        .route("/ws", get(ws_handler))
        .route("/stream", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Credentialed CORS for the configured origins; unparsable origins are skipped.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("cors: ignoring invalid origin {:?}", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CACHE_CONTROL,
            header::CONTENT_TYPE,
            header::ORIGIN,
            header::USER_AGENT,
            HeaderName::from_static("viewport"),
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(cors.max_age_secs))
}

/// Run the gateway server; opens the configured store, binds to server.bind:port and
/// blocks until shutdown (Ctrl+C or SIGTERM), then closes the store.
/// `config_path` is the path to the config file (used to resolve the message file).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let store = store::open_store(&config, &config_path).await?;
    let pipeline = Pipeline::new(store.clone(), &config.quota, config.store.timeout());
    log::info!(
        "quota: {} message(s) per channel per UTC day ({:?})",
        config.quota.daily_limit,
        config.quota.mode
    );

    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let state = GatewayState::new(config, pipeline);
    let event_tx = state.event_tx.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited");
    close_store(store.as_ref()).await;
    served?;
    log::info!("gateway stopped");
    Ok(())
}

async fn close_store(store: &dyn MessageStore) {
    match store.close().await {
        Ok(()) => log::info!("message store closed"),
        Err(e) => log::warn!("closing message store: {}", e),
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event so open streams close before the server drains.
async fn shutdown_signal(event_tx: broadcast::Sender<String>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing streams and draining connections");
    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
}

/// GET /health: liveness only, never touches the store.
async fn health_http() -> &'static str {
    log::debug!("health probe");
    HEALTH_BODY
}

/// POST /test: body `{ "msg": string }`, one message per request.
/// Accepted → 200 `{status, id}`; otherwise the matching [`AppError`] response.
async fn submit_http(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, AppError> {
    match state.pipeline.ingest(&body, Channel::Request).await {
        Outcome::Accepted(id) => Ok(Json(SubmitResponse::accepted(id))),
        Outcome::Rejected(reason) => Err(AppError::Rejected(reason)),
        Outcome::Failed(e) => Err(e.into()),
    }
}

/// GET /ws upgrades to WebSocket; each text frame is one message.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream::handle_socket(socket, state))
}

