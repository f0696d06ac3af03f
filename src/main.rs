//! VaultKV server
//!
//! Opens a store from command line / environment settings and serves it
//! over TCP using the RESP protocol.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vaultkv::commands::CommandHandler;
use vaultkv::connection::{handle_connection, ConnectionStats};
use vaultkv::storage::{
    config, BypassEviction, CachePolicy, FlatTransform, LfuPolicy, LruPolicy, PathTransform,
    ShardedTransform, Store, StoreConfig, UnorderedPolicy,
};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Policy {
    #[default]
    Unordered,
    Lru,
    Lfu,
}

impl Policy {
    fn build(self) -> Arc<dyn CachePolicy> {
        match self {
            Policy::Unordered => Arc::new(UnorderedPolicy),
            Policy::Lru => Arc::new(LruPolicy),
            Policy::Lfu => Arc::new(LfuPolicy),
        }
    }
}

/// Disk-backed key-value store with a bounded read cache
#[derive(Debug, Parser)]
#[command(name = "vaultkv", version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = vaultkv::DEFAULT_HOST, env = "VAULTKV_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = vaultkv::DEFAULT_PORT, env = "VAULTKV_PORT")]
    port: u16,

    /// Directory holding the data files
    #[arg(short, long, default_value = config::DEFAULT_BASE_DIR, env = "VAULTKV_DIR")]
    dir: PathBuf,

    /// Cache capacity in bytes (0 disables caching)
    #[arg(long, default_value_t = config::DEFAULT_CACHE_SIZE, env = "VAULTKV_MAX_CACHE_SIZE")]
    max_cache_size: u64,

    /// Cache eviction policy
    #[arg(long, value_enum, default_value_t, env = "VAULTKV_POLICY")]
    policy: Policy,

    /// Characters per shard directory (0 stores every file in the base directory)
    #[arg(long, default_value_t = 0, env = "VAULTKV_SHARD_WIDTH")]
    shard_width: usize,

    /// Number of nested shard directories
    #[arg(long, default_value_t = 2, env = "VAULTKV_SHARD_DEPTH")]
    shard_depth: usize,

    /// Size of streaming copy buffers in bytes
    #[arg(long, default_value_t = config::DEFAULT_BUFFER_SIZE, env = "VAULTKV_BUFFER_SIZE")]
    buffer_size: usize,

    /// Evict stale entries before bypass reads instead of in the background
    #[arg(long, env = "VAULTKV_SYNC_EVICTION")]
    sync_eviction: bool,
}

impl Args {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn store_config(&self) -> StoreConfig {
        let path_transform: Arc<dyn PathTransform> = if self.shard_width == 0 {
            Arc::new(FlatTransform)
        } else {
            Arc::new(ShardedTransform::new(self.shard_width, self.shard_depth))
        };
        StoreConfig {
            base_dir: self.dir.clone(),
            max_cache_size: self.max_cache_size,
            path_transform,
            cache_policy: self.policy.build(),
            buffer_size: self.buffer_size.max(1),
            bypass_eviction: if self.sync_eviction {
                BypassEviction::Immediate
            } else {
                BypassEviction::Deferred
            },
            ..Default::default()
        }
    }
}

fn print_banner(args: &Args) {
    println!(
        r#"
 __   __          _ _   _  ____     __
 \ \ / /_ _ _   _| | |_| |/ /\ \   / /
  \ V / _` | | | | | __| ' /  \ \ / /
   \_/\__,_|\__,_|_|\__|_|\_\  \_/ v{}
──────────────────────────────────────────
Data directory: {}
Server started on {}
Use Ctrl+C to shut down.
"#,
        vaultkv::VERSION,
        args.dir.display(),
        args.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&args);

    let store_config = args.store_config();
    let store = tokio::task::spawn_blocking(move || Store::open(store_config)).await??;
    info!(store = ?store, "Store ready");

    let stats = Arc::new(ConnectionStats::new());
    let listener = TcpListener::bind(args.bind_address()).await?;
    info!("Listening on {}", args.bind_address());

    tokio::select! {
        _ = accept_loop(listener, store.clone(), stats) => {}
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    store.close();
    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, store: Store, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let commands = CommandHandler::new(store.clone());
                tokio::spawn(handle_connection(stream, addr, commands, Arc::clone(&stats)));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
