//! tuya-stub Server Binary
//!
//! Starts an emulated device: control listener plus discovery broadcasts.

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use tuya_stub::{Config, ConnectionPolicy, DpKey, DpValue, Engine, Server};

/// tuya-stub Server
#[derive(Parser, Debug)]
#[command(name = "tuya-stub-server")]
#[command(about = "Emulated Tuya LAN device for testing protocol clients")]
#[command(version)]
struct Args {
    /// Device id
    #[arg(long)]
    id: String,

    /// 16-byte local key
    #[arg(long)]
    key: String,

    /// Address advertised in discovery broadcasts
    #[arg(long, default_value = "127.0.0.1")]
    ip: Ipv4Addr,

    /// TCP port for the control connection
    #[arg(short, long, default_value = "6668")]
    port: u16,

    /// UDP port for discovery broadcasts
    #[arg(long, default_value = "6666")]
    broadcast_port: u16,

    /// Seconds between discovery broadcasts
    #[arg(long, default_value = "5")]
    broadcast_interval: u64,

    /// Product key advertised in discovery broadcasts
    #[arg(long, default_value = "")]
    product_key: String,

    /// Initial data point, e.g. `--dps 1=true --dps 2=25`
    #[arg(long = "dps", value_parser = parse_dp)]
    dps: Vec<(DpKey, DpValue)>,

    /// Refuse a second client instead of replacing the first
    #[arg(long)]
    reject_busy: bool,

    /// Do not broadcast discovery announcements
    #[arg(long)]
    no_discovery: bool,
}

fn parse_dp(s: &str) -> Result<(DpKey, DpValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))?;
    Ok((DpKey::from(key), DpValue::parse_loose(value)))
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tuya_stub=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("tuya-stub Server v{}", tuya_stub::VERSION);

    let policy = if args.reject_busy {
        ConnectionPolicy::RejectIfBusy
    } else {
        ConnectionPolicy::ReplacePrevious
    };

    // Build config from args
    let mut builder = Config::builder()
        .device_id(&args.id)
        .shared_key(&args.key)
        .product_key(&args.product_key)
        .ip(args.ip)
        .listen_port(args.port)
        .broadcast_port(args.broadcast_port)
        .broadcast_interval_secs(args.broadcast_interval)
        .discovery_enabled(!args.no_discovery)
        .connection_policy(policy);
    for (key, value) in args.dps {
        builder = builder.dp(key, value);
    }

    let config = match builder.build() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let engine = match Engine::new(&config) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Initial state: {:?}", engine.get_state());

    // Runs until the process is terminated
    let mut server = Server::new(config, engine);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
