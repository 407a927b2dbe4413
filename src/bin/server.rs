//! EpochKV Server Binary
//!
//! Recovers the store from its log directory and starts the TCP server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use epochkv::network::Server;
use epochkv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// EpochKV Server
#[derive(Parser, Debug)]
#[command(name = "epochkv-server")]
#[command(about = "Single-node key-value store with snapshot/delta persistence")]
#[command(version)]
struct Args {
    /// Directory for base and delta log files
    #[arg(short, long, default_value = "./epochkv_logs")]
    log_dir: String,

    /// Listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(short, long, default_value = "12345")]
    port: u16,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Delta flush interval in milliseconds
    #[arg(long, default_value = "1000")]
    delta_ms: u64,

    /// Base snapshot interval in seconds
    #[arg(long, default_value = "60")]
    base_secs: u64,

    /// Write queue capacity
    #[arg(long, default_value = "64")]
    write_queue: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,epochkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("EpochKV Server v{}", epochkv::VERSION);
    tracing::info!("Log directory: {}", args.log_dir);

    let config = Config::builder()
        .log_dir(&args.log_dir)
        .listen_addr(format!("{}:{}", args.host, args.port))
        .max_connections(args.max_connections)
        .delta_interval(Duration::from_millis(args.delta_ms))
        .base_interval(Duration::from_secs(args.base_secs))
        .write_queue_capacity(args.write_queue)
        .build();

    // Recovery completes inside open, before the listener exists
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(config, Arc::clone(&engine));
    if let Err(e) = server.bind() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    let handle = server.handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        handle.shutdown();
    }) {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    drop(server);

    match Arc::try_unwrap(engine) {
        Ok(engine) => {
            if let Err(e) = engine.close() {
                tracing::error!("Final flush failed: {}", e);
            }
        }
        Err(_) => tracing::warn!("Engine still shared at shutdown; skipping final flush"),
    }

    tracing::info!("Server stopped");
}
