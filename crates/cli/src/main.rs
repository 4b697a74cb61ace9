use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "friendy")]
#[command(about = "Friendy feedback gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config.json and the data directory.
    Init {
        /// Config file path (default: FRIENDY_CONFIG_PATH or ~/.friendy/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the feedback gateway (POST /test and the /ws echo stream on one port).
    Serve {
        /// Config file path (default: FRIENDY_CONFIG_PATH or ~/.friendy/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP and WebSocket port (default: FRIENDY_PORT, then config, then 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Submit one message through the request channel.
    Submit {
        /// Message text
        message: String,

        /// Gateway base URL (default derived from config)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Config file path, used when --url is not given
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Open the echo stream and send each stdin line as one message.
    Stream {
        /// WebSocket URL (default derived from config)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Config file path, used when --url is not given
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("friendy {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Submit { message, url, config }) => {
            if let Err(e) = run_submit(message, url, config).await {
                log::error!("submit failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Stream { url, config }) => {
            if let Err(e) = run_stream(url, config).await {
                log::error!("stream failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting gateway on {}:{} ({:?} store)",
        config.server.bind,
        config.server.port,
        config.store.backend
    );
    lib::gateway::run_gateway(config, path).await
}

fn base_url(url: Option<String>, config_path: Option<PathBuf>) -> anyhow::Result<String> {
    match url {
        Some(u) => Ok(u.trim_end_matches('/').to_string()),
        None => {
            let (config, _) = lib::config::load_config(config_path)?;
            Ok(lib::config::local_base_url(&config))
        }
    }
}

async fn run_submit(
    message: String,
    url: Option<String>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let endpoint = format!("{}/test", base_url(url, config_path)?);
    let resp = reqwest::Client::new()
        .post(&endpoint)
        .json(&serde_json::json!({ "msg": message }))
        .send()
        .await?;
    let status = resp.status();
    let body: lib::gateway::SubmitResponse = resp.json().await?;
    match (status.is_success(), body.id) {
        (true, Some(id)) => println!("accepted (id {})", id),
        _ => {
            let why = body
                .reason
                .or(body.error)
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("{}: {}", body.status, why);
        }
    }
    Ok(())
}

async fn run_stream(url: Option<String>, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ws_url = match url {
        Some(u) => u,
        None => {
            let base = base_url(None, config_path)?;
            format!("{}/ws", base.replacen("http", "ws", 1))
        }
    };
    let (ws, _) = tokio_tungstenite::connect_async(&ws_url).await?;
    log::info!("connected to {}", ws_url);
    let (mut sink, mut stream) = ws.split();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                sink.send(Message::Text(line)).await?;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => println!("< {}", text),
                    Some(Ok(Message::Binary(bytes))) => {
                        println!("< {}", String::from_utf8_lossy(&bytes))
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => println!("closed by server: {} ({})", f.reason, u16::from(f.code)),
                            None => println!("closed by server"),
                        }
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        println!("connection ended");
                        return Ok(());
                    }
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
