use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::http::{self, HttpServer, Limiters};
use turnstile::ratelimit::{Reaper, SystemClock};

/// Rate-limited demo API.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file; environment variables are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::from_env()?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let rl = &config.rate_limiting;
    info!(
        addr = %config.server.addr(),
        global = rl.global_rate_limit,
        user = rl.user_rate_limit,
        admin = rl.admin_rate_limit,
        window_secs = rl.rate_limit_expiration_secs,
        "Configuration loaded"
    );

    let clock = Arc::new(SystemClock::new());
    let limiters = Limiters::from_config(rl, clock.clone())?;

    let reaper = limiters
        .stores()
        .into_iter()
        .fold(Reaper::new(rl.sweep_interval(), clock)?, Reaper::watch)
        .start();

    let server = HttpServer::new(config.server.addr(), http::router(&limiters));
    server.serve_with_shutdown(shutdown_signal()).await?;

    reaper.shutdown().await;
    info!("Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
