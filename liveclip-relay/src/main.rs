use std::time::Duration;

use clap::Parser;
use liveclip_relay::{AppState, RelayConfig, serve};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "liveclip-relay")]
struct RelayArgs {
    #[arg(long, default_value = "0.0.0.0:9000")]
    bind_address: String,

    /// Seconds an item stays in the shared collection.
    #[arg(long, default_value_t = 60)]
    ttl_secs: u64,

    #[arg(long, default_value_t = 5)]
    cleanup_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = RelayArgs::parse();
    if args.ttl_secs == 0 || args.cleanup_interval_secs == 0 {
        error!("--ttl-secs and --cleanup-interval-secs must be positive");
        std::process::exit(2);
    }

    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    let config = RelayConfig {
        ttl: Duration::from_secs(args.ttl_secs),
        cleanup_interval: Duration::from_secs(args.cleanup_interval_secs),
    };
    info!(
        ttl_secs = args.ttl_secs,
        cleanup_interval_secs = args.cleanup_interval_secs,
        "relay starting on {}",
        args.bind_address
    );
    if let Err(err) = serve(listener, AppState::with_config(config)).await {
        warn!("relay server exited: {}", err);
    }
}
