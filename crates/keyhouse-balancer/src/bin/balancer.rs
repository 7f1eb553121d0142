//! KeyHouse load balancer binary.
//!
//! Fronts a static pool of HTTP backends: probes `/health` on a fixed
//! cadence, routes each request to an alive backend via the configured
//! selection policy, and relays the response. Responds `503` when no
//! backend is alive.
//!
//! ## Example
//! ```bash
//! balancer --port 8090 --trace \
//!     --backend server1:8080 --backend server2:8080 --backend server3:8080
//! ```
//!
//! Logging is controlled via `RUST_LOG` (default: `info`).

use std::sync::Arc;

use clap::Parser;
use keyhouse_balancer::{
    router, BackendPool, BalancerConfig, BalancerState, HealthProber, HttpHealthChecker,
    SelectionPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "balancer", about = "HTTP load balancer for a static backend pool")]
struct Args {
    /// Load balancer port
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Request timeout in seconds
    #[arg(long = "timeout-sec", default_value_t = 3)]
    timeout_sec: u64,

    /// Whether backends support HTTPS
    #[arg(long)]
    https: bool,

    /// Whether to include tracing information into responses
    #[arg(long)]
    trace: bool,

    /// Health probe cadence in seconds
    #[arg(long = "probe-interval", default_value_t = 10)]
    probe_interval: u64,

    /// Backend address (host:port); repeat the flag for each backend
    #[arg(long = "backend", default_values_t = [
        "server1:8080".to_string(),
        "server2:8080".to_string(),
        "server3:8080".to_string(),
    ])]
    backends: Vec<String>,

    /// Selection policy: consistent-hash, least-connections or least-traffic
    #[arg(long, default_value = "consistent-hash")]
    policy: String,
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

    let policy = match args.policy.as_str() {
        "consistent-hash" => SelectionPolicy::ConsistentHash,
        "least-connections" => SelectionPolicy::LeastConnections,
        "least-traffic" => SelectionPolicy::LeastTraffic,
        other => return Err(format!("unknown selection policy: {}", other).into()),
    };

    let config = BalancerConfig {
        backends: args.backends,
        timeout_sec: args.timeout_sec,
        https: args.https,
        trace: args.trace,
        probe_interval_sec: args.probe_interval,
        policy,
    };

    let pool = Arc::new(BackendPool::new(config.backends.clone(), config.policy));
    let checker = Arc::new(HttpHealthChecker::new(
        config.scheme(),
        config.forward_timeout(),
    ));
    let prober_handle =
        HealthProber::new(Arc::clone(&pool), checker, config.probe_interval()).start();

    let app = router(BalancerState::new(pool, &config));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, "load balancer listening");
    tracing::info!(
        backends = config.backends.len(),
        policy = ?config.policy,
        trace = config.trace,
        "configuration"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    prober_handle.stop().await;
    tracing::info!("load balancer shut down gracefully");

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
