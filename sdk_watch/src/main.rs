use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sidecar_sdk::{GameServer, Sdk, SdkConfig, TransportKind};

/// sdk_watch - print every GameServer update pushed by the sidecar
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sidecar host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Sidecar gRPC port (defaults to AGONES_SDK_GRPC_PORT or 59357)
    #[arg(long)]
    grpc_port: Option<u16>,

    /// Sidecar HTTP port (defaults to AGONES_SDK_HTTP_PORT or 9358)
    #[arg(long)]
    http_port: Option<u16>,

    /// Watch transport: grpc, websocket or http-stream
    #[arg(short, long, default_value = "websocket")]
    transport: TransportKind,

    /// Wait for the sidecar and mark the game server Ready
    #[arg(short, long)]
    ready: bool,

    /// Health ping period in seconds, 0 disables pings
    #[arg(long, default_value = "10")]
    health_period_secs: u64,
}

fn print_game_server(gs: &GameServer) {
    let status = gs.status.clone().unwrap_or_default();
    let ports = status
        .ports
        .iter()
        .map(|p| format!("{}:{}", p.name, p.port))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "GameServer '{}' state={} address={} ports=[{}]",
        gs.name(),
        status.state,
        status.address,
        ports
    );
}

#[tokio::main(flavor = "multi_thread", worker_threads = 1)]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut config = SdkConfig::from_env()
        .context("Failed to read sidecar ports from the environment")?
        .with_host(args.host.clone())
        .with_transport(args.transport)
        .with_health_period(Duration::from_secs(args.health_period_secs))
        .with_auto_connect(args.ready);
    if let Some(port) = args.grpc_port {
        config = config.with_grpc_port(port);
    }
    if let Some(port) = args.http_port {
        config = config.with_http_port(port);
    }

    println!("=== sdk_watch ===");
    println!("Sidecar: {}", config.http_base_url());
    println!("Transport: {}", config.watch.transport);
    println!("Press Ctrl-C to quit");
    println!();

    let sdk = Sdk::new(config).context("Failed to start the SDK")?;
    tracing::debug!("SDK config: {:?}", sdk.config());

    let _handle = sdk.watch_game_server(|gs| print_game_server(&gs));

    if args.ready {
        tokio::select! {
            result = sdk.wait_connected() => {
                let gs = result.context("Auto-connect stopped")?;
                println!("Connected, marked '{}' Ready", gs.name());
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted before the sidecar answered");
                sdk.shutdown_sdk().await?;
                return Ok(());
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!();
    println!("Watch stats: {}", sdk.watch_stats());
    sdk.shutdown_sdk().await?;
    Ok(())
}
