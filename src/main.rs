use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use roomrelay::config::{Config, LogFormat};
use roomrelay::http::{app, AppState};
use roomrelay::summary::SummaryClient;
use roomrelay::{RateLimitConfig, RateLimiter, RoomRegistry, SignalingRouter};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roomrelay=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let registry = RoomRegistry::new(config.max_users_per_room, config.max_whiteboard_strokes);
    let router = SignalingRouter::new(registry, RateLimiter::new(RateLimitConfig::default()));
    let summary = SummaryClient::new(config.summary()).context("Failed to set up summary client")?;
    if !summary.is_configured() {
        info!("No summary API key set, /api/summarize is disabled");
    }
    let state = AppState::new(router.clone(), summary, RateLimiter::new(config.http_rate_limits()));

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = sweep_state.router.limiter().sweep() + sweep_state.http_limiter().sweep();
            if evicted > 0 {
                debug!(evicted, "Evicted idle rate-limit buckets");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!(
        addr = %config.bind,
        max_users = config.max_users_per_room,
        "Signaling relay listening"
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Signaling relay stopped");
    Ok(())
}
