//! KeyHouse DB server.
//!
//! Opens (or recovers) a store on a local directory and serves it over
//! the `/db/{key}` JSON API. Intended to sit behind the load balancer as
//! one of the application servers.
//!
//! ## Example
//! ```bash
//! keyhouse-server --port 8083 --dir ./data/keyhouse --size-limit 1048576
//! ```
//!
//! Logging is controlled via `RUST_LOG` (default: `info`).

use std::sync::Arc;

use clap::Parser;
use keyhouse_server::router;
use keyhouse_store::{Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "keyhouse-server", about = "HTTP wrapper around the KeyHouse store")]
struct Args {
    /// Server port
    #[arg(long, default_value_t = 8083)]
    port: u16,

    /// Directory holding the segment files
    #[arg(long, default_value = "./data/keyhouse")]
    dir: String,

    /// Per-segment byte cap before rollover
    #[arg(long = "size-limit", default_value_t = 1024 * 1024)]
    size_limit: u64,

    /// Sealed-segment count that triggers compaction
    #[arg(long = "compaction-threshold", default_value_t = 2)]
    compaction_threshold: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = StoreConfig {
        size_limit: args.size_limit,
        compaction_threshold: args.compaction_threshold,
    };

    tracing::info!(dir = %args.dir, "opening store");
    let store = Arc::new(Store::open(&args.dir, config).await?);

    let app = router(Arc::clone(&store));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, "db server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await?;
    tracing::info!("db server shut down gracefully");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
