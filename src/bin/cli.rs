//! EpochKV CLI Client
//!
//! Command-line interface for interacting with EpochKV.

use std::time::Duration;

use clap::{Parser, Subcommand};
use epochkv::{Client, ClientConfig, ResultCode};

/// EpochKV CLI
#[derive(Parser, Debug)]
#[command(name = "epochkv-cli")]
#[command(about = "CLI for the EpochKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    server: String,

    /// Give up on a response after this many milliseconds (0 waits forever)
    #[arg(short, long, default_value = "0")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set (must not be empty)
        value: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let config = if args.timeout_ms > 0 {
        ClientConfig::with_timeout(Duration::from_millis(args.timeout_ms))
    } else {
        ClientConfig::default()
    };

    let client = match Client::connect_with(&args.server, config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &args.command {
        Commands::Get { key } => client.get(key),
        Commands::Set { key, value } => client.set(key, value),
    };

    match result {
        Ok((code, value)) => {
            println!("({}, {:?})", i32::from(code), value);
            if code == ResultCode::Error {
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
