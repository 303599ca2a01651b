use anyhow::bail;
use clap::{Parser, Subcommand};
use client::client::GatewayClient;
use client::config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fsgw")]
#[command(about = "Feishu gateway client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect to the gateway stream and print each inbound message until Ctrl-C.
    Listen {
        /// Config file path (default: FSGW_CONFIG_PATH or ~/.fsgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway base URL (overrides config)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Send a text message through the gateway.
    Send {
        /// Config file path (default: FSGW_CONFIG_PATH or ~/.fsgw/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway base URL (overrides config)
        #[arg(long, short)]
        url: Option<String>,

        /// Target room or user id
        #[arg(long, short)]
        target: String,

        /// Message text
        #[arg(long, short)]
        message: String,

        /// User ids to mention (repeatable)
        #[arg(long)]
        at: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("fsgw {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Listen { config, url }) => {
            if let Err(e) = run_listen(config, url).await {
                log::error!("listen failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            url,
            target,
            message,
            at,
        }) => {
            if let Err(e) = run_send(config, url, target, message, at).await {
                log::error!("send failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Load config, apply overrides, and build a client ready to use.
fn build_client(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<GatewayClient> {
    let mut config = config::load_config(config_path)?;
    if let Some(url) = url {
        config.gateway.base_url = url;
    }
    if config.gateway.base_url.trim().is_empty() {
        bail!("gateway baseUrl is not configured (set it in the config file or pass --url)");
    }
    config.gateway.access_token = config::resolve_access_token(&config);
    Ok(GatewayClient::new(config.gateway))
}

async fn run_listen(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<()> {
    let gateway = build_client(config_path, url)?;

    gateway
        .router()
        .subscribe_fn(|event| {
            let room = if event.room_name.is_empty() {
                event.room_id.clone()
            } else {
                event.room_name.clone()
            };
            let sender = if event.sender_name.is_empty() {
                event.sender.clone()
            } else {
                event.sender_name.clone()
            };
            println!(
                "[{}] {} @ {}: {}",
                event.received_at.to_rfc3339(),
                sender,
                room,
                event.content
            );
        })
        .await;

    gateway.start().await;
    log::info!("listening for gateway messages, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    log::info!("stopping");
    gateway.stop().await;
    Ok(())
}

async fn run_send(
    config_path: Option<PathBuf>,
    url: Option<String>,
    target: String,
    message: String,
    at: Vec<String>,
) -> anyhow::Result<()> {
    let gateway = build_client(config_path, url)?;
    let at_list = if at.is_empty() { None } else { Some(at) };
    gateway.send_text(&target, &message, at_list).await?;
    println!("sent");
    Ok(())
}
