//! standing-circle daemon
//!
//! Serves the circle API and the live feed.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (sled under the local data dir)
//! standing-circle
//!
//! # Start with custom config
//! standing-circle --config /path/to/config.toml
//!
//! # Ephemeral in-memory storage (nothing survives restart)
//! standing-circle --memory
//!
//! # Custom port and share-URL origin
//! standing-circle --http-port 8100 --public-origin https://circle.example.org
//! ```

use clap::Parser;
use standing_circle::store::SledStoreConfig;
use standing_circle::{
    CircleRepository, CircleStore, Config, HttpServer, MemoryStore, RepositoryConfig, SledStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "standing-circle")]
#[command(about = "Shared circle service - token-addressed gift circle documents")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "CIRCLE_HTTP_PORT")]
    http_port: Option<u16>,

    /// Origin used when deriving share URLs
    #[arg(long, env = "CIRCLE_PUBLIC_ORIGIN")]
    public_origin: Option<String>,

    /// Maximum retained position history entries (0 = full audit trail)
    #[arg(long)]
    history_retention: Option<usize>,

    /// Use ephemeral in-memory storage instead of sled
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(origin) = args.public_origin {
        config.public_origin = origin;
    }
    if let Some(retention) = args.history_retention {
        config.history_retention = retention;
    }

    let store: Arc<dyn CircleStore> = if args.memory {
        info!("Using ephemeral in-memory storage");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SledStore::new(SledStoreConfig {
                db_path: config.circles_db_path(),
                ..Default::default()
            })
            .await?,
        )
    };

    let repo = Arc::new(CircleRepository::new(
        store,
        RepositoryConfig {
            history_retention: config.history_retention,
            channel_capacity: config.channel_capacity,
        },
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let server = Arc::new(HttpServer::new(
        repo,
        addr,
        config.public_origin.clone(),
    ));

    info!(
        port = config.http_port,
        origin = %config.public_origin,
        "standing-circle starting"
    );

    server.run().await?;
    Ok(())
}
