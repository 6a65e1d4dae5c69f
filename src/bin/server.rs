//! shardkv Server Binary
//!
//! Starts the TCP server for shardkv.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shardkv::network::Server;
use shardkv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// shardkv Server
#[derive(Parser, Debug)]
#[command(name = "shardkv-server")]
#[command(about = "Sharded key-value database server")]
#[command(version)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "9999")]
    port: u16,

    /// Listen host
    #[arg(short, long, default_value = "127.0.0.1")]
    listen: String,

    /// Init file with basedir and storage options
    #[arg(short, long, default_value = "init.cfg")]
    initfile: PathBuf,

    /// Worker threads
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// One storage instance per (shard, root kind)
    #[arg(short = 'k', long)]
    perkind: bool,

    /// Served shards: first shard and number of shards
    #[arg(short, long, num_args = 2, value_names = ["MIN", "RANGE"])]
    shards: Option<Vec<u16>>,

    /// Wipe the base directory on startup
    #[arg(short = 'x', long)]
    clear: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("shardkv Server v{}", shardkv::VERSION);

    // Build config from args and the init file
    let (shard_min, shard_range) = match args.shards.as_deref() {
        Some(&[min, range]) => (min, range),
        _ => (1, 1),
    };

    let builder = Config::builder()
        .listen_addr(format!("{}:{}", args.listen, args.port))
        .workers(args.workers)
        .per_kind(args.perkind)
        .shards(shard_min, shard_range)
        .clear_on_startup(args.clear);

    let builder = if args.initfile.exists() {
        match builder.init_file(&args.initfile) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Failed to load init file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        tracing::error!(
            "Init file not found: {}; continuing with defaults",
            args.initfile.display()
        );
        builder
    };
    let config = builder.build();

    tracing::info!("Base directory: {}", config.basedir.display());
    tracing::info!("Shards: min {}, range {}", config.shard_min, config.shard_range);
    tracing::info!("Listen address: {}", config.listen_addr);

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let server = match Server::bind(config, engine) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    // SIGINT/SIGTERM stop the server
    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, initiating shutdown...");
        shutdown.stop();
    }) {
        tracing::warn!("Unable to install signal handler: {}", e);
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
