mod config;
mod cursor;
mod governor;
mod http;
mod models;
mod relay;
mod retry;
mod sink;
mod source;
mod transform;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::governor::RateGovernor;
use crate::relay::Relay;
use crate::sink::WebhookSink;
use crate::source::ChannelSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rustrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Channel: {}", config.source.channel_id);
    info!("  API: {}", config.source.api_base);
    info!(
        "  Source limit: {} requests / {}ms",
        config.rate_limit.source.max_requests, config.rate_limit.source.window_ms
    );
    info!(
        "  Sink limit: {} requests / {}ms",
        config.rate_limit.sink.max_requests, config.rate_limit.sink.window_ms
    );
    info!("  Poll interval: {:?}", config.relay.poll_interval());
    info!("  Rejection policy: {:?}", config.sink.rejection_policy());

    let source = ChannelSource::new(
        &config.source,
        RateGovernor::new("source", &config.rate_limit.source),
        config.relay.poll_backoff(),
    )?;
    let sink = WebhookSink::new(
        &config.sink,
        RateGovernor::new("sink", &config.rate_limit.sink),
    )?;
    let mut relay = Relay::new(source, sink, config.relay.poll_interval());

    info!("Relay is starting...");
    tokio::select! {
        _ = relay.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping relay");
        }
    }

    let stats = relay.stats();
    info!(
        "Relayed {} messages ({} dropped, {} skipped) before shutdown",
        stats.relayed, stats.dropped, stats.skipped
    );
    if let Some(last) = relay.cursor().current() {
        info!("Last relayed message: {}", last);
    }

    Ok(())
}
