//! # banter-server
//!
//! Main binary: wires the document store, voice orchestrator, presence
//! registry, REST API and websocket gateway into one process behind a
//! single listener. REST lives under `/api`, signaling at `/ws`.

use banter_api::AppState;
use banter_common::events::ServerEvent;
use banter_gateway::{presence::PresenceRegistry, GatewayState};
use banter_store::Directory;
use banter_voice::{RtcOptions, VoiceManager};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "banter",
    about = "Realtime text & voice coordination server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server.
    Serve {
        /// HTTP + websocket listen port.
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Path of the persisted JSON document.
        #[arg(long, env = "DATA_FILE")]
        data_file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, data_file } => serve(port, data_file).await,
    }
}

async fn serve(port: Option<u16>, data_file: Option<String>) -> anyhow::Result<()> {
    // CLI flags win over the environment; config reads the environment.
    if let Some(port) = port {
        std::env::set_var("PORT", port.to_string());
    }
    if let Some(path) = data_file {
        std::env::set_var("DATA_FILE", path);
    }
    let config = banter_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=info,tower_http=info".into()),
        )
        .init();

    tracing::info!("starting banter v{}", env!("CARGO_PKG_VERSION"));

    // Event bus: domain events and presence/membership snapshots fan
    // out to every connected client through here.
    let (bus, _) = broadcast::channel::<ServerEvent>(10_000);

    let directory = Arc::new(Directory::open(&config.data_file, bus.clone()).await);
    tracing::info!(path = %config.data_file, "document store ready");

    let voice = VoiceManager::new(
        RtcOptions {
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
            announced_ip: config.announced_ip,
        },
        bus.clone(),
    )
    .await?;

    let presence = Arc::new(PresenceRegistry::new(bus.clone()));

    let api = banter_api::build_router(
        AppState {
            directory: directory.clone(),
            voice: voice.clone(),
        },
        config.frontend_url.clone(),
    );
    let gateway = banter_gateway::build_router(GatewayState {
        bus,
        presence,
        voice,
        directory,
    });
    let app = api.merge(gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on http://{addr} (signaling at ws://{addr}/ws)");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
