//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.friendy/config.json`) and environment.
//! Every section has defaults, so an empty `{}` file (or no file) is a working config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP/WebSocket listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Daily quota per channel.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Message store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Streaming channel behavior.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Allowed browser origins.
    #[serde(default)]
    pub cors: CorsConfig,
}

/// Listener bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Port for HTTP and WebSocket (default 8080). Overridden by FRIENDY_PORT env.
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            port: default_server_port(),
        }
    }
}

/// How the quota check and the write relate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaMode {
    /// Count, then insert as a separate store call. Concurrent submissions to one bucket can
    /// both pass the check, so a bucket may exceed the limit by the number of racing requests.
    #[default]
    CheckThenWrite,
    /// Single conditional insert: the store counts and writes under one lock or transaction.
    Atomic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    /// Accepted messages per channel per UTC day (default 2).
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    #[serde(default)]
    pub mode: QuotaMode,
}

fn default_daily_limit() -> u32 {
    2
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            mode: QuotaMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; lost on restart.
    Memory,
    /// Append-only JSON lines file.
    #[default]
    File,
    /// PostgreSQL `feedback` table (requires the `postgres` feature).
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// File backend path. Relative paths resolve against the config file's parent;
    /// default is `feedback.jsonl` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Postgres connection string. Overridden by FRIENDY_DATABASE_URL env.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Deadline for each store call, in milliseconds (default 5000).
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Postgres pool size (default 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            database_url: None,
            timeout_ms: default_store_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// What the streaming channel does after a message is rejected by the quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectPolicy {
    /// Close the connection (the first rejection ends the session).
    #[default]
    Close,
    /// Drop the rejected message and keep reading frames.
    Continue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default)]
    pub on_reject: RejectPolicy,

    /// When true, a JSON notice frame (`{"type":"rejected"|"closed","reason":...}`) is sent
    /// before a rejected message is dropped or the connection is closed. Default: false.
    #[serde(default)]
    pub notices: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    /// Origins allowed to call the API with credentials.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime in seconds (default 1728000, i.e. 20 days).
    #[serde(default = "default_cors_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_allowed_origins() -> Vec<String> {
    [
        "http://localhost:3000",
        "http://78.82.194.129",
        "https://friendy-fe-kkrep.ondigitalocean.app",
        "http://friendy.me",
        "https://friendy.me",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_cors_max_age_secs() -> u64 {
    1_728_000
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            max_age_secs: default_cors_max_age_secs(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the Postgres URL: env FRIENDY_DATABASE_URL overrides config.
pub fn resolve_database_url(config: &Config) -> Option<String> {
    env_non_empty("FRIENDY_DATABASE_URL").or_else(|| {
        config
            .store
            .database_url
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the listen port: env FRIENDY_PORT overrides config. Invalid values are ignored.
pub fn resolve_port(config: &Config) -> u16 {
    match env_non_empty("FRIENDY_PORT") {
        Some(p) => p.parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid FRIENDY_PORT {:?}", p);
            config.server.port
        }),
        None => config.server.port,
    }
}

/// Directory holding the config file (and, by default, the message file).
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Resolve the file store path: `store.path` if set (relative to the config file's parent), otherwise `feedback.jsonl` beside the config file.
pub fn resolve_store_path(config: &Config, config_path: &Path) -> PathBuf {
    let dir = config_dir(config_path);
    match &config.store.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                dir.join(p)
            }
        }
        _ => dir.join("feedback.jsonl"),
    }
}

/// Base URL a local client should use to reach the server (wildcard binds map to loopback).
pub fn local_base_url(config: &Config) -> String {
    let bind = config.server.bind.trim();
    let host = match bind {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" => "[::1]",
        other => other,
    };
    format!("http://{}:{}", host, config.server.port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FRIENDY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".friendy").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, else the default path (or FRIENDY_CONFIG_PATH). Missing file => default config.
/// FRIENDY_PORT is applied on top of the file.
/// Returns the config and the path that was used (for resolving the store file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.server.port = resolve_port(&config);
    Ok((config, path))
}
