use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower::ServiceBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quotaguard::config::QuotaGuardConfig;
use quotaguard::{handle_error, RateLimitLayer, RateLimiter};

/// Demo server answering "/" behind the rate limiter.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting QuotaGuard demo server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = QuotaGuardConfig::load(args.config.as_deref())?;
    let listen_addr = args.listen.unwrap_or(config.server.listen_addr);
    info!(
        listen_addr = %listen_addr,
        driver = %config.rate_limiting.driver,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::from_settings(&config.rate_limiting).await?);

    let app = Router::new()
        .route("/", get(hit))
        .with_state(Arc::new(AtomicU64::new(0)))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_error))
                .layer(RateLimitLayer::new(limiter)),
        );

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("Listening on {}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("QuotaGuard demo server stopped");
    Ok(())
}

async fn hit(State(hits): State<Arc<AtomicU64>>) -> String {
    let n = hits.fetch_add(1, Ordering::Relaxed) + 1;
    format!("Num times hit: {}", n)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
