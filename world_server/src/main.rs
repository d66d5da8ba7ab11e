use std::path::PathBuf;
use std::sync::Arc;

use async_ctrlc::CtrlC;
use clap::Parser;
use time::macros::format_description;
use tracing_subscriber::{fmt::time::UtcTime, EnvFilter};

use world_server::auth_service::{AuthService, HttpAuthService};
use world_server::chat_service::{ChatBroker, RedisChatBroker};
use world_server::config;
use world_server::prelude::*;
use world_server::{start_server, ServerOptions, DEFAULT_LOGIC_THREADS, MAX_CONCURRENT_CONNECTIONS};

const DEFAULT_CHAT_BROKER_URL: &str = "redis://127.0.0.1:6379";

#[derive(Parser)]
#[command(name = "world_server", about = "Authoritative world server for a 2D multiplayer zone")]
struct Args {
    /// Port to listen on for game clients.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Number of I/O executor threads.
    #[arg(long, default_value_t = 2)]
    io_threads: usize,

    /// Number of ingress worker tasks.
    #[arg(long, default_value_t = DEFAULT_LOGIC_THREADS)]
    logic_threads: usize,

    /// Path to the server configuration file.
    #[arg(long, default_value = "config/server_config.json")]
    server_config: PathBuf,

    /// Path to the gameplay configuration file.
    #[arg(long, default_value = "config/game_config.json")]
    game_config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let timer = UtcTime::new(format_description!("[day]-[month]-[year] [hour]:[minute]:[second]"));
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new("world_server=info"))
        .with_env_filter(EnvFilter::from_default_env())
        .with_timer(timer)
        .init();

    info!("starting world server");

    // The executor sizes itself from this on first use, so it must be set
    // before anything async runs.
    std::env::set_var("SMOL_THREADS", args.io_threads.max(1).to_string());

    let server_config = config::load_server_config(&args.server_config)?;
    let game_config = config::load_game_config(&args.game_config)?;

    let auth: Option<Arc<dyn AuthService>> = match &server_config.auth_server {
        Some(auth) => Some(Arc::new(HttpAuthService::new(auth.host.clone(), auth.port))),
        None => {
            warn!("no auth server configured; logins will be refused");
            None
        }
    };

    let chat_url = server_config
        .chat_broker
        .as_ref()
        .map(|c| c.url.as_str())
        .unwrap_or(DEFAULT_CHAT_BROKER_URL);
    let chat: Option<Arc<dyn ChatBroker>> = match RedisChatBroker::new(chat_url) {
        Ok(broker) => Some(Arc::new(broker)),
        Err(e) => {
            error!("chat broker unavailable, chat disabled: {e:#}");
            None
        }
    };

    smol::block_on(async {
        let handle = start_server(ServerOptions {
            bind_addr: format!("0.0.0.0:{}", args.port),
            max_connections: MAX_CONCURRENT_CONNECTIONS,
            logic_threads: args.logic_threads,
            game: game_config,
            auth,
            chat,
        })
        .await?;

        let ctrlc = CtrlC::new().context("registering ctrl+c handler")?;
        ctrlc.await;
        info!("received ctrl+c, starting graceful shutdown");
        handle.shutdown();
        Ok(())
    })
}
